use bucketsync::tooling::cli::{BucketCommands, Cli, Commands};
use clap::{CommandFactory, Parser};

#[test]
fn parse_valid_command_matrix() {
    let cases: Vec<Vec<&str>> = vec![
        vec!["bucketsync", "serve"],
        vec![
            "bucketsync",
            "serve",
            "--listen",
            "0.0.0.0:7400",
            "--advertise",
            "10.0.0.1:7400",
            "--seed",
            "10.0.0.2:7400",
        ],
        vec!["bucketsync", "ping", "127.0.0.1:7400", "--format", "json"],
        vec!["bucketsync", "peers", "127.0.0.1:7400"],
        vec!["bucketsync", "state", "127.0.0.1:7400"],
        vec!["bucketsync", "config", "--format", "json"],
        vec!["bucketsync", "bucket", "list"],
        vec!["bucketsync", "bucket", "create", "--name", "a", "--path", "/a"],
        vec!["bucketsync", "bucket", "update", "b1", "--gzip", "true"],
        vec!["bucketsync", "item", "put", "b1", "./logo.png"],
        vec!["bucketsync", "item", "get", "b1", "logo.png", "--output", "out.png"],
        vec!["bucketsync", "--log-level", "debug", "item", "list", "b1"],
    ];

    for args in cases {
        let parsed = Cli::try_parse_from(args.clone());
        assert!(parsed.is_ok(), "expected valid parse for args: {args:?}");
    }
}

#[test]
fn parse_rejects_missing_arguments() {
    assert!(Cli::try_parse_from(["bucketsync", "ping"]).is_err());
    assert!(Cli::try_parse_from(["bucketsync", "bucket", "create", "--name", "a"]).is_err());
    assert!(Cli::try_parse_from(["bucketsync", "item", "put", "b1"]).is_err());
}

#[test]
fn bucket_create_defaults() {
    let cli = Cli::try_parse_from(["bucketsync", "bucket", "create", "--name", "a", "--path", "/a"])
        .unwrap();
    match cli.command {
        Commands::Bucket {
            command:
                BucketCommands::Create {
                    id,
                    cache_ttl,
                    gzip,
                    ..
                },
        } => {
            assert_eq!(id, None);
            assert_eq!(cache_ttl, 0);
            assert!(!gzip);
        }
        _ => panic!("expected bucket create"),
    }
}

#[test]
fn help_lists_every_command() {
    let help = Cli::command().render_long_help().to_string();
    for name in ["serve", "ping", "peers", "state", "config", "bucket", "item"] {
        assert!(help.contains(name), "help is missing {name}");
    }
}
