mod common;

use std::collections::BTreeSet;

use convert_core::{run, CoverageIssue, DestRegionId, RegionMapping, SourceRegionId};

#[test]
fn inverse_mapping_matches_forward_groups() -> anyhow::Result<()> {
    let tree = save_runtime::parse_str(common::PROVINCE_MAPPINGS)?;
    let mapping = RegionMapping::from_tree(&tree)?;

    let inverse = mapping.inverse();
    assert_eq!(inverse.len(), 2);
    assert_eq!(
        inverse[&DestRegionId(10)],
        [1, 2].map(SourceRegionId).into_iter().collect::<BTreeSet<_>>()
    );
    assert_eq!(
        inverse[&DestRegionId(11)],
        [2].map(SourceRegionId).into_iter().collect::<BTreeSet<_>>()
    );
    assert!(!inverse.contains_key(&DestRegionId(12)));

    let issues = mapping.validate_coverage([1, 2, 3].map(SourceRegionId));
    assert_eq!(issues, vec![CoverageIssue::Unmapped(SourceRegionId(3))]);
    Ok(())
}

#[test]
fn unmapped_destination_province_gets_rest_of_world_state() -> anyhow::Result<()> {
    let install = common::install()?;
    let report = run(&install.config)?;
    assert_eq!(report.coverage_warnings, 1);
    assert_eq!(report.coverage_errors, 0);
    assert_eq!(report.provinces_rest_of_world, 1);

    let output = install.read_output()?;
    let orkney = output.get("-12").expect("province 12 in output");
    assert_eq!(orkney.get_scalar("owner"), None);
    assert_eq!(orkney.get_scalar("controller"), None);
    assert_eq!(orkney.get_all("core").count(), 0);
    assert_eq!(orkney.get_scalar("culture"), Some("norwegian"));
    assert_eq!(orkney.get_scalar("base_tax"), Some("1.000"));
    assert_eq!(orkney.get_scalar("trade_goods"), Some("fish"));
    Ok(())
}

#[test]
fn shared_source_province_feeds_both_destinations() -> anyhow::Result<()> {
    let install = common::install()?;
    run(&install.config)?;
    let output = install.read_output()?;

    let middlesex = output.get("-10").expect("province 10");
    assert_eq!(middlesex.get_scalar("owner"), Some("ENG"));
    assert_eq!(middlesex.get_scalar("culture"), Some("saxon"));
    assert_eq!(middlesex.get_scalar("base_tax"), Some("3.500"));

    let kent = output.get("-11").expect("province 11");
    assert_eq!(kent.get_scalar("owner"), Some("ENG"));
    assert_eq!(kent.get_scalar("base_tax"), Some("1.000"));
    Ok(())
}
