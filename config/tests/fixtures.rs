#![allow(clippy::restriction)]

use std::{fs, path::Path};

use avalon_config::{
    client::{ENV_CHANNEL, ENV_PEER},
    env::TestEnv,
    CatalogError, Config, MethodCatalog, NetworkProfile, ParseError, ProfileError,
};

const NETWORK: &str = r#"{
    "name": "sample-network",
    "client": { "organization": "Org1" },
    "organizations": {
        "Org1": { "mspid": "Org1MSP", "peers": ["peer0.org1.example.com"] }
    },
    "peers": {
        "peer0.org1.example.com": {
            "url": "localhost:7051",
            "tlsCACerts": { "path": "crypto/tls/ca.crt" }
        }
    }
}"#;

const METHODS: &str = r#"{
    "registry": {
        "query": { "isQuery": true, "callparams": [{ "name": "workerID", "type": "bytes32" }] }
    }
}"#;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn files_next_to_the_config_are_found() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "client.toml", "channel = \"workers\"\n");
    write(dir.path(), "network.json", NETWORK);
    write(dir.path(), "methods.json", METHODS);

    let config = Config::load_with_env(dir.path().join("client.toml"), &TestEnv::new()).unwrap();
    assert_eq!(config.channel, "workers");
    assert_eq!(config.profile, dir.path().join("network.json"));

    let profile = NetworkProfile::load(&config.profile).unwrap();
    assert_eq!(profile.organization().unwrap(), "Org1");

    let catalog = MethodCatalog::load(&config.methods).unwrap();
    assert!(catalog.method("registry", "query").unwrap().is_query);
}

#[test]
fn env_wins_over_the_file() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "client.toml",
        "channel = \"workers\"\npeer = \"peer0.org1.example.com\"\n",
    );
    let env = TestEnv::new()
        .set(ENV_CHANNEL, "mychannel")
        .set(ENV_PEER, "peer1.org1.example.com");

    let config = Config::load_with_env(dir.path().join("client.toml"), &env).unwrap();
    assert_eq!(config.channel, "mychannel");
    assert_eq!(config.peer.as_deref(), Some("peer1.org1.example.com"));
}

#[test]
fn missing_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();

    let err = Config::load_with_env(dir.path().join("client.toml"), &TestEnv::new()).unwrap_err();
    assert_eq!(err.current_context(), &ParseError::ReadFile);
    assert!(format!("{err:?}").contains("client.toml"));

    let err = NetworkProfile::load(dir.path().join("network.json")).unwrap_err();
    assert_eq!(err.current_context(), &ProfileError::ReadFile);

    write(dir.path(), "methods.json", "[]");
    let err = MethodCatalog::load(dir.path().join("methods.json")).unwrap_err();
    assert_eq!(err.current_context(), &CatalogError::Json);
}
