//! Integration tests for kobuild

use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A Go module at github.com/google/ko with a `test` package and `cmd/ko`
fn ko_checkout() -> TempDir {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "go.mod", "module github.com/google/ko\n\ngo 1.22\n");
    write(temp.path(), "main.go", "package main\n");
    write(temp.path(), "test/main.go", "package main\n");
    write(temp.path(), "cmd/ko/main.go", "package main\n");
    temp
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

mod cli_tests {
    use super::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn kobuild() -> Command {
        let mut cmd = cargo_bin_cmd!("kobuild");
        cmd.env_remove("KO_CONFIG_PATH")
            .env_remove("KO_DEFAULTBASEIMAGE");
        cmd
    }

    #[test]
    fn help_displays() {
        kobuild()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("base image resolution"));
    }

    #[test]
    fn version_displays() {
        kobuild()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kobuild"));
    }

    #[test]
    fn targets_default_to_working_directory_package() {
        let temp = ko_checkout();
        kobuild()
            .args(["targets", "--format", "plain", "-C"])
            .arg(temp.path())
            .assert()
            .success()
            .stdout("github.com/google/ko\n");
    }

    #[test]
    fn targets_from_project_config() {
        let temp = ko_checkout();
        write(
            temp.path(),
            ".ko.toml",
            r#"
[[builds]]
id = "test"
main = "./test"

[[builds]]
id = "ko"
dir = "cmd"
main = "ko"
"#,
        );

        kobuild()
            .args(["targets", "--format", "json", "-C"])
            .arg(temp.path())
            .assert()
            .success()
            .stdout(
                predicate::str::contains("\"github.com/google/ko/test\"")
                    .and(predicate::str::contains("\"github.com/google/ko/cmd/ko\"")),
            );
    }

    #[test]
    fn duplicate_targets_fail() {
        let temp = ko_checkout();
        write(
            temp.path(),
            ".ko.toml",
            r#"
[[builds]]
id = "first"
main = "test"

[[builds]]
id = "second"
dir = "test"
"#,
        );

        kobuild()
            .args(["targets", "-C"])
            .arg(temp.path())
            .assert()
            .failure()
            .stderr(
                predicate::str::contains("first and second")
                    .and(predicate::str::contains("Hint:")),
            );
    }

    #[test]
    fn go_mod_without_module_directive_fails() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "go.mod", "go 1.22\n");
        kobuild()
            .args(["targets", "-C"])
            .arg(temp.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("go mod init"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let temp = ko_checkout();
        write(temp.path(), ".ko.toml", "builds = \"nope\"\n");

        kobuild()
            .args(["targets", "-C"])
            .arg(temp.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn resolve_rejects_bad_platform() {
        let temp = ko_checkout();
        kobuild()
            .args(["resolve", "--platform", "linux", "-C"])
            .arg(temp.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid platform 'linux'"));
    }

    #[test]
    fn resolve_reports_bad_reference_per_target() {
        let temp = ko_checkout();
        kobuild()
            .args(["resolve", "--base-image", "Not/A/Reference", "-C"])
            .arg(temp.path())
            .assert()
            .failure()
            .stdout(predicate::str::contains("github.com/google/ko"))
            .stderr(predicate::str::contains("Invalid image reference"));
    }
}

mod resolution_tests {
    use super::*;
    use kobuild::base::{BaseImageResolver, BaseImageSettings, BaseSource};
    use kobuild::config::{BuildConfig, BuildOptions, ProjectConfig};
    use kobuild::image::{Platform, PlatformSelector};
    use kobuild::plan::Invocation;
    use kobuild::registry::InMemoryRegistry;
    use kobuild::BaseImageError;
    use std::sync::Arc;
    use std::time::Duration;

    fn project_config() -> ProjectConfig {
        toml::from_str(
            r#"
default_base_image = "gcr.io/distroless/static:nonroot"

[base_image_overrides]
"ko://github.com/google/ko/test" = "alpine:3.20"

[[builds]]
id = "ko"
main = "./cmd/ko"

[[builds]]
id = "test"
dir = "test"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn plan_pins_every_target() {
        let temp = ko_checkout();
        let registry = Arc::new(InMemoryRegistry::new());
        let multi = [Platform::new("linux", "amd64"), Platform::new("linux", "arm64")];
        let distroless = registry
            .push_index("gcr.io/distroless/static:nonroot", &multi)
            .unwrap();
        let alpine = registry.push_index("alpine:3.20", &multi).unwrap();

        let options = BuildOptions::new(temp.path()).with_platforms(["all"]);
        let invocation = Invocation::new(options, project_config(), temp.path().to_path_buf());
        let plan = invocation.plan(registry.clone()).await.unwrap();

        assert!(plan.platform.is_all());
        let bases = plan.bases.into_result().unwrap();
        assert_eq!(
            bases["github.com/google/ko/cmd/ko"].reference.to_string(),
            format!("gcr.io/distroless/static@{}", distroless)
        );
        assert_eq!(
            bases["github.com/google/ko/test"].reference.to_string(),
            format!("index.docker.io/library/alpine@{}", alpine)
        );
        assert!(bases.values().all(|b| b.descriptor.is_index()));
        assert_eq!(registry.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn invocation_override_beats_configuration() {
        let registry = Arc::new(InMemoryRegistry::new());
        let pinned = registry.push_image("gcr.io/team/base:v2", None).unwrap();

        let options = BuildOptions::default().with_base_image("gcr.io/team/base:v2");
        let settings = BaseImageSettings::from_config(&project_config(), &options);
        let resolver = BaseImageResolver::new(registry, settings);

        assert_eq!(
            resolver.select_reference("github.com/google/ko/test"),
            ("gcr.io/team/base:v2", BaseSource::Invocation)
        );
        let got = resolver
            .resolve(&PlatformSelector::All, "ko://github.com/google/ko/test")
            .await
            .unwrap();
        assert_eq!(got.reference.digest(), Some(&pinned));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_targets_share_one_fetch() {
        let temp = ko_checkout();
        let builds: Vec<BuildConfig> = (0..20)
            .map(|i| {
                write(temp.path(), &format!("cmd/t{}/main.go", i), "package main\n");
                BuildConfig {
                    main: Some(format!("./cmd/t{}", i)),
                    ..BuildConfig::default()
                }
            })
            .collect();

        let registry = Arc::new(InMemoryRegistry::new().with_latency(Duration::from_millis(20)));
        registry
            .push_index(
                "cgr.dev/chainguard/static:latest",
                &[Platform::new("linux", "amd64"), Platform::new("linux", "arm64")],
            )
            .unwrap();

        let config = ProjectConfig {
            builds,
            ..ProjectConfig::default()
        };
        let options = BuildOptions::new(temp.path()).with_platforms(["linux/arm64"]);
        let invocation = Invocation::new(options, config, temp.path().to_path_buf());
        let plan = invocation.plan(registry.clone()).await.unwrap();

        let bases = plan.bases.into_result().unwrap();
        assert_eq!(bases.len(), 20);
        let first = bases.values().next().unwrap();
        assert!(bases.values().all(|b| b == first));
        assert_eq!(registry.digest_calls(), 1);
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn one_missing_base_fails_only_its_target() {
        let temp = ko_checkout();
        let registry = Arc::new(InMemoryRegistry::new());
        registry
            .push_image("gcr.io/distroless/static:nonroot", None)
            .unwrap();

        let invocation = Invocation::new(
            BuildOptions::new(temp.path()),
            project_config(),
            temp.path().to_path_buf(),
        );
        let plan = invocation.plan(registry).await.unwrap();

        assert!(plan.bases.results["github.com/google/ko/cmd/ko"].is_ok());
        let failures: Vec<(&str, &BaseImageError)> = plan.bases.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "github.com/google/ko/test");
    }
}
