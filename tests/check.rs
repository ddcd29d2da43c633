// tests/check.rs

//! End-to-end check runs over a temporary managed install directory.

mod common;

use cairn::detect::NoVendorUpdates;
use cairn::manifest::{ConditionalItem, write_manifest};
use cairn::resolver::InstallInfo;
use cairn::{CancellationToken, CheckOrchestrator, CheckReport, Error, Manifest};
use chrono::NaiveDate;
use common::*;
use std::fs;

const PLENTY: FixedDiskSpace = FixedDiskSpace(50_000_000);

fn run(fixture: &Fixture, repo: &MemoryRepo, fetcher: &FakeFetcher) -> cairn::Result<cairn::CheckOutcome> {
    CheckOrchestrator::new(&fixture.config, repo, fetcher, &PLENTY, &NoVendorUpdates, machine())
        .run(None)
}

fn names_of(records: &[cairn::OutcomeRecord]) -> Vec<&str> {
    records.iter().map(|r| r.name.as_str()).collect()
}

#[test]
fn test_check_builds_and_persists_plan() {
    let fixture = Fixture::new();
    fixture.add_receipt(&receipt_id("Baz"), "1.0");

    let mut foo = package("Foo", "1.0");
    foo.requires = vec!["Bar".to_string()];
    let mut baz = removable("Baz", "1.0");
    baz.autoremove = true;

    let mut primary = manifest(&["production"]);
    primary.managed_installs = names(["Foo"]);
    primary.conditional_items = vec![ConditionalItem {
        condition: Some("machine_type == \"desktop\"".to_string()),
        managed_installs: names(["Qux"]),
        ..Default::default()
    }];

    let repo = MemoryRepo::new()
        .with_catalog(
            "production",
            vec![foo, present("Bar", "2.0"), baz, package("Qux", "1.0")],
        )
        .with_manifest("lab-01.example.com", primary);
    let fetcher = FakeFetcher::new();

    let outcome = run(&fixture, &repo, &fetcher).unwrap();

    let info = &outcome.install_info;
    // Conditional items are walked before the manifest's own entries
    assert_eq!(names_of(&info.managed_installs), vec!["Qux", "Foo"]);
    assert_eq!(names_of(&info.removals), vec!["Baz"]);
    assert!(info.removals[0].installed);
    assert!(outcome.install_info_changed);
    assert!(outcome.pending());
    assert_eq!(outcome.exit_code(), 1);

    let report = &outcome.report;
    assert_eq!(report.manifest_name.as_deref(), Some("lab-01.example.com"));
    assert_eq!(report.installed_items, vec!["Bar"]);
    assert!(report.problem_installs.is_empty());
    assert_eq!(report.managed_installs_list, vec!["Bar", "Foo", "Qux"]);
    assert_eq!(report.managed_uninstalls_list, vec!["Baz"]);

    let saved = InstallInfo::load(&fixture.config.install_info_path()).unwrap();
    assert_eq!(&saved, info);
    let saved_report = CheckReport::load(&fixture.config.report_path()).unwrap();
    assert_eq!(saved_report.manifest_name.as_deref(), Some("lab-01.example.com"));

    // Same inputs, same plan
    let again = run(&fixture, &repo, &fetcher).unwrap();
    assert!(!again.install_info_changed);
    assert_eq!(&again.install_info, info);
}

#[test]
fn test_nothing_to_do_exits_zero() {
    let fixture = Fixture::new();
    let mut primary = manifest(&["production"]);
    primary.managed_installs = names(["Bar"]);
    let repo = MemoryRepo::new()
        .with_catalog("production", vec![present("Bar", "1.0")])
        .with_manifest("site_default", primary);

    let outcome = run(&fixture, &repo, &FakeFetcher::new()).unwrap();
    assert!(!outcome.pending());
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.report.manifest_name.as_deref(), Some("site_default"));
}

#[test]
fn test_primary_manifest_candidates_in_order() {
    let fixture = Fixture::new();
    let repo = MemoryRepo::new()
        .with_catalog("production", Vec::new())
        .with_manifest("lab-01", manifest(&["production"]))
        .with_manifest("site_default", manifest(&["production"]));

    let outcome = run(&fixture, &repo, &FakeFetcher::new()).unwrap();
    assert_eq!(outcome.report.manifest_name.as_deref(), Some("lab-01"));

    let explicit = CheckOrchestrator::new(
        &fixture.config,
        &repo,
        &FakeFetcher::new(),
        &PLENTY,
        &NoVendorUpdates,
        machine(),
    )
    .run(Some("site_default"))
    .unwrap();
    assert_eq!(explicit.report.manifest_name.as_deref(), Some("site_default"));
}

#[test]
fn test_missing_primary_manifest_falls_back_to_previous_plan() {
    let fixture = Fixture::new();
    let repo = MemoryRepo::new();

    let err = run(&fixture, &repo, &FakeFetcher::new()).unwrap_err();
    assert!(matches!(err, Error::NoPrimaryManifest));

    let previous = InstallInfo {
        managed_installs: vec![cairn::OutcomeRecord {
            name: "Foo".to_string(),
            installer_item: Some("Foo-1.0.pkg".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    };
    previous.save_if_changed(&fixture.config.install_info_path()).unwrap();

    let outcome = run(&fixture, &repo, &FakeFetcher::new()).unwrap();
    assert_eq!(outcome.install_info, previous);
    assert!(!outcome.install_info_changed);
    assert_eq!(outcome.report.manifest_name, None);
    assert_eq!(outcome.report.warnings.len(), 1);
    assert!(fixture.config.report_path().exists());
}

#[test]
fn test_past_deadline_forces_unattended_install() {
    let fixture = Fixture::new();
    let mut qux = package("Qux", "1.0");
    qux.force_install_after_date = Some(
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap(),
    );
    let mut primary = manifest(&["production"]);
    primary.managed_installs = names(["Qux"]);
    let repo = MemoryRepo::new()
        .with_catalog("production", vec![qux])
        .with_manifest("site_default", primary);
    let fetcher = FakeFetcher::new();

    let before = NaiveDate::from_ymd_opt(2024, 2, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let early = CheckOrchestrator::new(&fixture.config, &repo, &fetcher, &PLENTY, &NoVendorUpdates, machine())
        .with_clock(before)
        .run(None)
        .unwrap();
    assert_eq!(early.report.force_install_urgency, None);
    assert!(!early.install_info.managed_installs[0].unattended_install);

    let after = NaiveDate::from_ymd_opt(2024, 3, 2)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let late = CheckOrchestrator::new(&fixture.config, &repo, &fetcher, &PLENTY, &NoVendorUpdates, machine())
        .with_clock(after)
        .run(None)
        .unwrap();
    assert_eq!(late.report.force_install_urgency.as_deref(), Some("now"));
    assert!(late.install_info.managed_installs[0].unattended_install);

    let saved = InstallInfo::load(&fixture.config.install_info_path()).unwrap();
    assert!(saved.managed_installs[0].unattended_install);
}

#[test]
fn test_self_service_choices_are_applied() {
    let fixture = Fixture::new();
    fixture.add_receipt(&receipt_id("Tool"), "1.0");

    let mut primary = manifest(&["production"]);
    primary.optional_installs = names(["Editor", "Tool", "Game"]);
    let repo = MemoryRepo::new()
        .with_catalog(
            "production",
            vec![
                package("Editor", "1.0"),
                removable("Tool", "1.0"),
                package("Game", "1.0"),
                package("Hidden", "1.0"),
            ],
        )
        .with_manifest("site_default", primary);

    let choices = Manifest {
        managed_installs: names(["Editor", "Hidden"]),
        managed_uninstalls: names(["Tool"]),
        ..Default::default()
    };
    write_manifest(&fixture.config.self_serve_user_path(), &choices).unwrap();

    let outcome = run(&fixture, &repo, &FakeFetcher::new()).unwrap();

    assert!(!fixture.config.self_serve_user_path().exists());
    assert!(fixture.config.self_serve_path().exists());

    let info = &outcome.install_info;
    assert_eq!(names_of(&info.managed_installs), vec!["Editor"]);
    assert_eq!(names_of(&info.removals), vec!["Tool"]);

    let optional = &info.optional_installs;
    assert_eq!(names_of(optional), vec!["Editor", "Tool", "Game"]);
    assert!(optional[0].will_be_installed);
    assert!(optional[1].will_be_removed);
    assert!(!optional[2].will_be_installed);
}

#[test]
fn test_cache_pruned_to_plan() {
    let fixture = Fixture::new();
    let cache = fixture.config.cache_dir();
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("Stale-0.1.pkg"), b"old").unwrap();
    fs::write(cache.join("Foo-1.0.pkg.download"), b"partial").unwrap();
    let catalogs_dir = fixture.config.catalogs_dir();
    fs::create_dir_all(&catalogs_dir).unwrap();
    fs::write(catalogs_dir.join("production"), b"").unwrap();
    fs::write(catalogs_dir.join("retired"), b"").unwrap();

    let mut primary = manifest(&["production"]);
    primary.managed_installs = names(["Foo"]);
    let repo = MemoryRepo::new()
        .with_catalog("production", vec![package("Foo", "1.0")])
        .with_manifest("site_default", primary);

    run(&fixture, &repo, &FakeFetcher::new()).unwrap();

    assert!(fixture.cache_file("Foo-1.0.pkg").exists());
    assert!(!fixture.cache_file("Foo-1.0.pkg.download").exists());
    assert!(!fixture.cache_file("Stale-0.1.pkg").exists());
    assert!(catalogs_dir.join("production").exists());
    assert!(!catalogs_dir.join("retired").exists());
}

#[test]
fn test_problem_items_keep_partial_downloads() {
    let fixture = Fixture::new();
    let cache = fixture.config.cache_dir();
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("Foo-1.0.pkg.download"), b"partial").unwrap();

    let mut primary = manifest(&["production"]);
    primary.managed_installs = names(["Foo"]);
    let repo = MemoryRepo::new()
        .with_catalog("production", vec![package("Foo", "1.0")])
        .with_manifest("site_default", primary);
    let fetcher = FakeFetcher::new().unreachable("Foo-1.0.pkg");

    let outcome = run(&fixture, &repo, &fetcher).unwrap();

    assert_eq!(names_of(&outcome.report.problem_installs), vec!["Foo"]);
    assert!(outcome.install_info.managed_installs.is_empty());
    assert!(fixture.cache_file("Foo-1.0.pkg.download").exists());
}

#[test]
fn test_cancelled_run_persists_nothing() {
    let fixture = Fixture::new();
    let mut primary = manifest(&["production"]);
    primary.managed_installs = names(["Foo"]);
    let repo = MemoryRepo::new()
        .with_catalog("production", vec![package("Foo", "1.0")])
        .with_manifest("site_default", primary);
    let fetcher = FakeFetcher::new();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = CheckOrchestrator::new(&fixture.config, &repo, &fetcher, &PLENTY, &NoVendorUpdates, machine())
        .with_cancellation(cancel)
        .run(None)
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(!fixture.config.install_info_path().exists());
    assert!(!fixture.config.report_path().exists());
    assert!(fetcher.requested.borrow().is_empty());
}
