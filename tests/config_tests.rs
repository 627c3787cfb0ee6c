//! Integration tests for configuration loading and client construction.

use std::io::Write;

use block_csi::config::ConfigError;
use block_csi::controller::DEFAULT_DRIVER_NAME;
use block_csi::test_support::EnvGuard;
use block_csi::{CloudConfig, IaasClient};
use rstest::rstest;
use tempfile::NamedTempFile;

const BASE_VARS: [(&str, &str); 3] = [
    ("BLOCK_CSI_API_URL", "https://iaas.example.test"),
    ("BLOCK_CSI_PROJECT_ID", "project-1"),
    ("BLOCK_CSI_HTTP_TIMEOUT_SECS", "12"),
];

#[rstest]
#[tokio::test]
async fn environment_variables_populate_config() {
    let mut vars = BASE_VARS.to_vec();
    vars.push(("BLOCK_CSI_ACCESS_TOKEN", "inline-token"));
    vars.push(("BLOCK_CSI_CLUSTER", "prod"));
    let _guard = EnvGuard::set_vars(&vars).await;

    let config = CloudConfig::load_without_cli_args().expect("config should load");

    assert_eq!(config.api_url, "https://iaas.example.test");
    assert_eq!(config.project_id, "project-1");
    assert_eq!(config.driver_name, DEFAULT_DRIVER_NAME);
    assert_eq!(config.cluster.as_deref(), Some("prod"));
    assert_eq!(config.http_timeout_secs, 12);
    assert_eq!(config.access_token().as_deref(), Ok("inline-token"));
}

#[rstest]
#[tokio::test]
async fn token_file_feeds_the_client() {
    let mut file = NamedTempFile::new().expect("create token file");
    writeln!(file, "file-token").expect("write token");
    let path = file.path().to_str().expect("utf-8 temp path").to_owned();

    let mut vars = BASE_VARS.to_vec();
    vars.push(("BLOCK_CSI_ACCESS_TOKEN_FILE", path.as_str()));
    let _guard = EnvGuard::set_vars(&vars).await;

    let config = CloudConfig::load_without_cli_args().expect("config should load");

    assert_eq!(config.access_token().as_deref(), Ok("file-token"));
    let client = IaasClient::from_config(&config).expect("client should build");
    let rendered = format!("{client:?}");
    assert!(rendered.contains("project-1"), "{rendered}");
    assert!(!rendered.contains("file-token"), "token leaked: {rendered}");
}

#[rstest]
#[tokio::test]
async fn client_construction_rejects_missing_token() {
    let _guard = EnvGuard::set_vars(&BASE_VARS).await;

    let config = CloudConfig::load_without_cli_args().expect("config should load");
    let err = IaasClient::from_config(&config).expect_err("token is required");

    let ConfigError::MissingField(ref message) = err else {
        panic!("expected MissingField error, got {err:?}");
    };
    assert!(
        message.contains("BLOCK_CSI_ACCESS_TOKEN"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("block-csi.toml"),
        "error should mention config file: {message}"
    );
}
