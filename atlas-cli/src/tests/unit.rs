//! Unit tests for argument resolution and layered configuration.

use super::helpers::{Workspace, capture};
use super::*;
use crate::expand::{
    ARG_EXPAND_INPUT, ARG_EXPAND_OUTPUT, ARG_EXPAND_TIMESTAMP, ENV_EXPAND_INPUT,
    ENV_EXPAND_OUTPUT, ExpandArgs, ExpandConfig,
};
use crate::extract::{
    ARG_EXTRACT_DB, ENV_EXTRACT_DB, ExtractArgs, ExtractConfig, RegionSource, execute_extract,
};
use crate::query::{QueryArgs, QueryConfig, QueryTarget};
use crate::update::{
    ARG_UPDATE_DB, ARG_UPDATE_OSC, ARG_UPDATE_SEQNUM, ARG_UPDATE_TIMESTAMP, ENV_UPDATE_DB,
    ENV_UPDATE_OSC, ENV_UPDATE_SEQNUM, ENV_UPDATE_TIMESTAMP, UpdateArgs, UpdateConfig,
};
use atlas_core::{EntityKind, RegionError, RegionFormat};
use atlas_data::Finish;
use camino::Utf8PathBuf;
use rstest::rstest;

fn complete_update_args() -> UpdateArgs {
    UpdateArgs {
        db: Some(Utf8PathBuf::from("atlas.db")),
        osc: Some(Utf8PathBuf::from("changes.osc")),
        seqnum: Some("6".to_owned()),
        timestamp: Some("2024-03-01T12:00:00Z".to_owned()),
        commit: None,
    }
}

fn bbox_extract_args() -> ExtractArgs {
    ExtractArgs {
        db: Some(Utf8PathBuf::from("atlas.db")),
        output: Some(Utf8PathBuf::from("out.jsonl")),
        bbox: Some("51,-1,52,0".to_owned()),
        ..ExtractArgs::default()
    }
}

#[rstest]
#[case::input(None, Some("atlas.db"), ARG_EXPAND_INPUT, ENV_EXPAND_INPUT)]
#[case::output(Some("city.osm.pbf"), None, ARG_EXPAND_OUTPUT, ENV_EXPAND_OUTPUT)]
fn expand_requires_input_and_output(
    #[case] input: Option<&str>,
    #[case] output: Option<&str>,
    #[case] expected_field: &'static str,
    #[case] expected_env: &'static str,
) {
    let args = ExpandArgs {
        input: input.map(Utf8PathBuf::from),
        output: output.map(Utf8PathBuf::from),
        ..ExpandArgs::default()
    };
    let err = ExpandConfig::try_from(args).expect_err("missing path should error");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, expected_field);
            assert_eq!(env, expected_env);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn expand_config_records_the_input_file_name() {
    let args = ExpandArgs {
        input: Some(Utf8PathBuf::from("/data/city.osm.pbf")),
        output: Some(Utf8PathBuf::from("/data/city.db")),
        sort_capacity: Some(128),
        seqnum: Some("42".to_owned()),
        ..ExpandArgs::default()
    };
    let config = ExpandConfig::try_from(args).expect("config should build");
    assert_eq!(config.options.sort_capacity, 128);
    assert_eq!(config.options.scratch_dir, None);
    assert_eq!(
        config.metadata.import_filename.as_deref(),
        Some("city.osm.pbf")
    );
    assert_eq!(config.metadata.sequence_number.as_deref(), Some("42"));
    assert_eq!(config.metadata.timestamp, None);
}

#[rstest]
fn expand_rejects_malformed_timestamps() {
    let args = ExpandArgs {
        input: Some(Utf8PathBuf::from("city.osm.pbf")),
        output: Some(Utf8PathBuf::from("city.db")),
        timestamp: Some("yesterday".to_owned()),
        ..ExpandArgs::default()
    };
    match ExpandConfig::try_from(args).expect_err("bad timestamp") {
        CliError::InvalidTimestamp { field, value, .. } => {
            assert_eq!(field, ARG_EXPAND_TIMESTAMP);
            assert_eq!(value, "yesterday");
        }
        other => panic!("expected InvalidTimestamp, found {other:?}"),
    }
}

#[rstest]
fn expand_reports_a_missing_snapshot() {
    let workspace = Workspace::new();
    let args = ExpandArgs {
        input: Some(workspace.path("absent.osm.pbf")),
        output: Some(workspace.path("atlas.db")),
        ..ExpandArgs::default()
    };
    let config = ExpandConfig::try_from(args).expect("config should build");
    match crate::expand::execute_expand(&config).expect_err("missing input") {
        CliError::MissingSourceFile { field, .. } => assert_eq!(field, ARG_EXPAND_INPUT),
        other => panic!("expected MissingSourceFile, found {other:?}"),
    }
}

#[rstest]
fn extract_requires_a_store() {
    let args = ExtractArgs {
        db: None,
        ..bbox_extract_args()
    };
    match ExtractConfig::try_from(args).expect_err("missing db") {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_EXTRACT_DB);
            assert_eq!(env, ENV_EXTRACT_DB);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
#[case::none(None, None, 0)]
#[case::two_inline(Some("0,0,1,1"), Some("0,0,1"), 2)]
fn extract_needs_exactly_one_region(
    #[case] bbox: Option<&str>,
    #[case] disc: Option<&str>,
    #[case] expected: usize,
) {
    let args = ExtractArgs {
        bbox: bbox.map(str::to_owned),
        disc: disc.map(str::to_owned),
        ..bbox_extract_args()
    };
    match ExtractConfig::try_from(args).expect_err("region choice") {
        CliError::RegionChoice { given } => assert_eq!(given, expected),
        other => panic!("expected RegionChoice, found {other:?}"),
    }
}

#[rstest]
fn extract_counts_file_regions_towards_the_choice() {
    let args = ExtractArgs {
        poly: Some(Utf8PathBuf::from("city.poly")),
        ..bbox_extract_args()
    };
    match ExtractConfig::try_from(args).expect_err("two regions") {
        CliError::RegionChoice { given } => assert_eq!(given, 2),
        other => panic!("expected RegionChoice, found {other:?}"),
    }
}

#[rstest]
#[case::default(None, true)]
#[case::disabled(Some(false), false)]
fn extract_config_resolves_region_and_options(
    #[case] nested: Option<bool>,
    #[case] expected: bool,
) {
    let args = ExtractArgs {
        nested_completeness: nested,
        ..bbox_extract_args()
    };
    let config = ExtractConfig::try_from(args).expect("config should build");
    assert_eq!(
        config.region,
        RegionSource::Inline {
            format: RegionFormat::Bbox,
            text: "51,-1,52,0".to_owned(),
        }
    );
    assert_eq!(config.options.nested_completeness, expected);
}

#[rstest]
fn malformed_regions_fail_before_the_store_is_opened() {
    let workspace = Workspace::new();
    let args = ExtractArgs {
        db: Some(workspace.path("never-created.db")),
        output: Some(workspace.path("out.jsonl")),
        bbox: Some("91,0,92,1".to_owned()),
        ..ExtractArgs::default()
    };
    let config = ExtractConfig::try_from(args).expect("config should build");
    match execute_extract(&config).expect_err("invalid latitude") {
        CliError::Region(RegionError::Latitude { .. }) => {}
        other => panic!("expected a region error, found {other:?}"),
    }
    assert!(!workspace.path("out.jsonl").exists());
}

#[rstest]
fn region_files_need_a_known_extension() {
    let workspace = Workspace::new();
    let region = workspace.write("area.txt", "0,0,1,1");
    let source = RegionSource::File {
        field: "region",
        format: None,
        path: region,
    };
    match source.load().expect_err("unknown extension") {
        CliError::Region(RegionError::UnknownExtension { path }) => {
            assert!(path.ends_with("area.txt"));
        }
        other => panic!("expected UnknownExtension, found {other:?}"),
    }
}

#[rstest]
fn region_files_are_parsed_by_extension() {
    let workspace = Workspace::new();
    let path = workspace.write("area.bbox", "51,-1,52,0\n");
    let source = RegionSource::File {
        field: "region",
        format: None,
        path,
    };
    let region = source.load().expect("bbox file");
    assert_eq!(region.shapes().len(), 1);
}

#[rstest]
#[case::db(ARG_UPDATE_DB, ENV_UPDATE_DB)]
#[case::osc(ARG_UPDATE_OSC, ENV_UPDATE_OSC)]
#[case::seqnum(ARG_UPDATE_SEQNUM, ENV_UPDATE_SEQNUM)]
#[case::timestamp(ARG_UPDATE_TIMESTAMP, ENV_UPDATE_TIMESTAMP)]
fn update_requires_every_marker_field(
    #[case] missing: &'static str,
    #[case] expected_env: &'static str,
) {
    let mut args = complete_update_args();
    match missing {
        ARG_UPDATE_DB => args.db = None,
        ARG_UPDATE_OSC => args.osc = None,
        ARG_UPDATE_SEQNUM => args.seqnum = None,
        _ => args.timestamp = None,
    }
    match UpdateConfig::try_from(args).expect_err("missing field") {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, missing);
            assert_eq!(env, expected_env);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
#[case::dry_run(None, Finish::Abort)]
#[case::explicit_dry_run(Some(false), Finish::Abort)]
#[case::commit(Some(true), Finish::Commit)]
fn update_commits_only_when_asked(#[case] commit: Option<bool>, #[case] expected: Finish) {
    let args = UpdateArgs {
        commit,
        ..complete_update_args()
    };
    let config = UpdateConfig::try_from(args).expect("config should build");
    assert_eq!(config.finish, expected);
    assert_eq!(config.marker.sequence_number, "6");
}

#[rstest]
fn update_merges_layers_by_precedence() {
    use ortho_config::MergeComposer;
    use serde_json::json;

    let mut composer = MergeComposer::new();
    composer.push_file(
        json!({
            "db": "from-file.db",
            "osc": "from-file.osc",
            "seqnum": "1",
        }),
        None,
    );
    composer.push_environment(json!({
        "seqnum": "2",
        "timestamp": "2024-03-01T12:00:00Z",
    }));
    composer.push_cli(json!({ "osc": "from-cli.osc", "commit": true }));

    let config = crate::update::config_from_layers_for_test(composer.layers())
        .expect("merged config should build");
    assert_eq!(config.db, Utf8PathBuf::from("from-file.db"));
    assert_eq!(config.osc, Utf8PathBuf::from("from-cli.osc"));
    assert_eq!(config.marker.sequence_number, "2");
    assert_eq!(config.finish, Finish::Commit);
}

#[rstest]
fn update_maps_configuration_errors() {
    use ortho_config::MergeComposer;
    use serde_json::json;

    let mut composer = MergeComposer::new();
    composer.push_cli(json!({ "seqnum": ["not", "a", "string"] }));
    match crate::update::config_from_layers_for_test(composer.layers())
        .expect_err("invalid layer")
    {
        CliError::Configuration(_) => {}
        other => panic!("expected Configuration, found {other:?}"),
    }
}

#[rstest]
#[case::no_target(None, None, QueryTarget::Stats)]
#[case::stat(Some("stat"), None, QueryTarget::Stats)]
#[case::point(Some("point"), Some(1), QueryTarget::Entity(EntityKind::Point, 1))]
#[case::way_alias(Some("way"), Some(10), QueryTarget::Entity(EntityKind::Sequence, 10))]
#[case::relation_alias(
    Some("relation"),
    Some(20),
    QueryTarget::Entity(EntityKind::Collection, 20)
)]
#[case::timestamp(Some("timestamp"), None, QueryTarget::Timestamp)]
#[case::seqnum(Some("seqnum"), None, QueryTarget::SequenceNumber)]
fn query_targets_resolve(
    #[case] target: Option<&str>,
    #[case] id: Option<u64>,
    #[case] expected: QueryTarget,
) {
    let args = QueryArgs {
        db: Some(Utf8PathBuf::from("atlas.db")),
        target: target.map(str::to_owned),
        id,
    };
    let config = QueryConfig::try_from(args).expect("query should resolve");
    assert_eq!(config.target, expected);
}

#[rstest]
fn entity_queries_need_an_id() {
    let args = QueryArgs {
        db: Some(Utf8PathBuf::from("atlas.db")),
        target: Some("sequence".to_owned()),
        id: None,
    };
    match QueryConfig::try_from(args).expect_err("missing id") {
        CliError::MissingQueryId { target } => assert_eq!(target, EntityKind::Sequence),
        other => panic!("expected MissingQueryId, found {other:?}"),
    }
}

#[rstest]
fn unknown_query_targets_are_rejected() {
    let args = QueryArgs {
        db: Some(Utf8PathBuf::from("atlas.db")),
        target: Some("changeset".to_owned()),
        id: Some(1),
    };
    let err = QueryConfig::try_from(args).expect_err("unknown target");
    assert!(err.to_string().contains("\"changeset\""));
}

#[rstest]
fn missing_argument_message_names_flag_and_environment() {
    let err = CliError::MissingArgument {
        field: ARG_UPDATE_DB,
        env: ENV_UPDATE_DB,
    };
    assert_eq!(
        err.to_string(),
        "missing db (set --db or ATLAS_CMDS_UPDATE_DB)"
    );
}

#[rstest]
#[case::bare_flag(&["atlas", "update", "--commit"], Some(true))]
#[case::explicit(&["atlas", "update", "--commit", "false"], Some(false))]
#[case::absent(&["atlas", "update"], None)]
fn commit_flag_parses_with_or_without_a_value(
    #[case] argv: &[&str],
    #[case] expected: Option<bool>,
) {
    let cli = Cli::try_parse_from(argv).expect("arguments should parse");
    match cli.command {
        Command::Update(args) => assert_eq!(args.commit, expected),
        other => panic!("expected update, found {other:?}"),
    }
}

#[rstest]
fn bounding_boxes_may_start_with_a_minus_sign() {
    let cli = Cli::try_parse_from(["atlas", "extract", "--bbox", "-34,-59,-33,-58"])
        .expect("arguments should parse");
    match cli.command {
        Command::Extract(args) => assert_eq!(args.bbox.as_deref(), Some("-34,-59,-33,-58")),
        other => panic!("expected extract, found {other:?}"),
    }
}

#[rstest]
fn query_accepts_positional_target_and_id() {
    let cli = Cli::try_parse_from(["atlas", "query", "--db", "atlas.db", "point", "7"])
        .expect("arguments should parse");
    match cli.command {
        Command::Query(args) => {
            assert_eq!(args.target.as_deref(), Some("point"));
            assert_eq!(args.id, Some(7));
        }
        other => panic!("expected query, found {other:?}"),
    }
}

#[rstest]
fn query_on_a_missing_store_names_the_path() {
    let workspace = Workspace::new();
    let args = QueryArgs {
        db: Some(workspace.path("absent.db")),
        target: None,
        id: None,
    };
    let err = capture(|writer| crate::query::run_query_with(args, writer))
        .expect_err("missing store");
    match err {
        CliError::MissingSourceFile { path, .. } => assert!(path.ends_with("absent.db")),
        other => panic!("expected MissingSourceFile, found {other:?}"),
    }
}
