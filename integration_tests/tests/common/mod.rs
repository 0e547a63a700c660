#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use convert_core::ConverterConfig;
use save_runtime::Node;
use tempfile::TempDir;

pub const TRAITS: &str = "
genius = { diplomacy = 5 martial = 5 stewardship = 5 intrigue = 5 learning = 5 }
brave = { martial = 2 }
";

pub const DYNASTIES: &str = "
1 = { name = \"Godwin\" culture = saxon religion = catholic }
2 = { name = \"Normandie\" culture = norman religion = catholic }
";

/// England holds CK2 provinces 1 and 2, Normandy holds 3.
pub const SAVE: &str = "CK2txt
date = \"1066.9.15\"
player = { id = 10 type = 45 }
character = {
	10 = { birth_name = Harold dynasty = 1 attributes = { 10 12 16 4 3 } traits = { 2 } government = feudal_government wealth = 150 prestige = 400 }
	11 = { birth_name = William dynasty = 2 attributes = { 8 14 6 5 5 } government = feudal_government }
	20 = { birth_name = Stigand dynasty = 1 employer = 10 job_title = job_chancellor location = 2 attributes = { 9 2 3 4 8 } }
	21 = { birth_name = Odo employer = 11 job_title = job_spiritual location = 3 }
}
title = {
	k_england = { holder = 10 }
	c_london = { holder = 10 liege = k_england }
	c_kent = { holder = 10 liege = k_england }
	d_normandy = { holder = 11 }
	c_rouen = { holder = 11 liege = d_normandy }
}
provinces = {
	1 = { name = London title = c_london culture = saxon religion = catholic b_london = { type = city } b_tower = { type = castle } b_abbey = { type = temple } }
	2 = { name = Kent title = c_kent culture = saxon religion = catholic b_canterbury = { type = temple } }
	3 = { name = Rouen title = c_rouen culture = norman religion = catholic b_rouen = { type = castle } }
}
}
";

/// 1 -> {10}, 2 -> {10, 11}, 3 -> {}.
pub const PROVINCE_MAPPINGS: &str = "
link = { ck2 = 1 eu3 = 10 }
link = { ck2 = 2 eu3 = 10 eu3 = 11 }
link = { ck2 = 3 }
";

/// Fake CK2 and EU3 installs plus mapping files, written on `build`.
pub struct InstallBuilder {
    save: String,
    province_mappings: String,
    country_mappings: String,
    blocked_nations: String,
    universe: Vec<String>,
    country_histories: Vec<(String, String)>,
    province_histories: Vec<(String, String)>,
}

impl Default for InstallBuilder {
    fn default() -> Self {
        Self {
            save: SAVE.to_string(),
            province_mappings: PROVINCE_MAPPINGS.to_string(),
            country_mappings: String::new(),
            blocked_nations: "REB PIR".to_string(),
            universe: ["ENG", "FRA", "NOR", "REB", "PIR"]
                .map(String::from)
                .to_vec(),
            country_histories: vec![(
                "NOR - Norway.txt".to_string(),
                "government = feudal_monarchy primary_culture = norwegian religion = catholic technology_group = western capital = 12".to_string(),
            )],
            province_histories: vec![
                ("10 - Middlesex.txt".to_string(), "culture = english religion = catholic base_tax = 6 trade_goods = cloth".to_string()),
                ("11 - Kent.txt".to_string(), "culture = english religion = catholic base_tax = 4 trade_goods = grain".to_string()),
                ("12 - Orkney.txt".to_string(), "owner = NOR controller = NOR add_core = NOR culture = norwegian religion = catholic base_tax = 2 trade_goods = fish".to_string()),
            ],
        }
    }
}

impl InstallBuilder {
    pub fn save(mut self, text: &str) -> Self {
        self.save = text.to_string();
        self
    }

    pub fn country_mappings(mut self, text: &str) -> Self {
        self.country_mappings = text.to_string();
        self
    }

    pub fn blocked_nations(mut self, text: &str) -> Self {
        self.blocked_nations = text.to_string();
        self
    }

    pub fn universe(mut self, tags: &[&str]) -> Self {
        self.universe = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn build(self) -> anyhow::Result<Install> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let root = dir.path().to_path_buf();
        let ck2 = root.join("ck2");
        let eu3 = root.join("eu3");

        write(&ck2.join("common/traits/00_traits.txt"), TRAITS)?;
        write(&ck2.join("common/dynasties.txt"), DYNASTIES)?;

        let countries: String = self
            .universe
            .iter()
            .map(|tag| format!("{tag} = \"countries/{tag}.txt\"\n"))
            .collect();
        write(&eu3.join("common/countries.txt"), &countries)?;
        fs::create_dir_all(eu3.join("history/countries"))?;
        for (name, text) in &self.country_histories {
            write(&eu3.join("history/countries").join(name), text)?;
        }
        fs::create_dir_all(eu3.join("history/provinces"))?;
        for (name, text) in &self.province_histories {
            write(&eu3.join("history/provinces").join(name), text)?;
        }

        write(&root.join("input.ck2"), &self.save)?;
        write(&root.join("province_mappings.txt"), &self.province_mappings)?;
        write(&root.join("country_mappings.txt"), &self.country_mappings)?;
        write(&root.join("blocked_nations.txt"), &self.blocked_nations)?;

        let config = ConverterConfig {
            ck2_path: ck2,
            eu3_path: eu3,
            input_file: root.join("input.ck2"),
            output_file: root.join("output.eu3"),
            log_file: root.join("log.txt"),
            province_mappings: root.join("province_mappings.txt"),
            country_mappings: root.join("country_mappings.txt"),
            blocked_nations: root.join("blocked_nations.txt"),
            ..ConverterConfig::default()
        };
        Ok(Install {
            _dir: dir,
            root,
            config,
        })
    }
}

pub struct Install {
    _dir: TempDir,
    pub root: PathBuf,
    pub config: ConverterConfig,
}

impl Install {
    pub fn output_path(&self) -> &Path {
        &self.config.output_file
    }

    pub fn read_output(&self) -> anyhow::Result<Node> {
        save_runtime::parse_file(self.output_path()).context("parse converted save")
    }
}

pub fn install() -> anyhow::Result<Install> {
    InstallBuilder::default().build()
}

fn write(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
