//! Evidence contract address lookup.
//!
//! Deployment artifacts follow the hardhat-deploy layout:
//! `<deployments_dir>/<network>/<ContractName>.json` with a top-level
//! `address` field.

use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::config::Config;

#[derive(Deserialize)]
struct DeploymentArtifact {
    address: Option<String>,
}

/// Path of a deployment artifact.
pub fn artifact_path(deployments_dir: &Path, network: &str, contract_name: &str) -> PathBuf {
    deployments_dir
        .join(network)
        .join(format!("{contract_name}.json"))
}

/// Read a contract's address from its deployment artifact.
pub fn resolve_contract_address(
    contract_name: &str,
    network: &str,
    deployments_dir: &Path,
) -> Result<Address> {
    if contract_name.trim().is_empty() {
        bail!("Contract name cannot be empty");
    }
    if network.trim().is_empty() {
        bail!("Network name cannot be empty");
    }

    let path = artifact_path(deployments_dir, network, contract_name);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Contract artifact not found: {}", path.display()))?;
    let artifact: DeploymentArtifact = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid contract artifact: {}", path.display()))?;

    let Some(address) = artifact.address else {
        bail!("Address field not found in contract artifact: {}", path.display());
    };

    evidence_core::parse_address(&address)
        .with_context(|| format!("Invalid address in contract artifact: {}", path.display()))
}

/// Contract address from config, falling back to the deployment artifact.
pub fn contract_address_from_config(config: &Config) -> Result<Address> {
    if let Some(address) = config.contract.address {
        return Ok(address);
    }

    let address = resolve_contract_address(
        &config.contract.name,
        &config.network.name,
        &config.contract.deployments_dir,
    )?;
    info!(
        "Resolved {} on {} to {}",
        config.contract.name, config.network.name, address
    );
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_artifact(dir: &Path, network: &str, name: &str, body: &str) {
        let network_dir = dir.join(network);
        std::fs::create_dir_all(&network_dir).unwrap();
        std::fs::write(network_dir.join(format!("{name}.json")), body).unwrap();
    }

    #[test]
    fn test_resolves_address_from_artifact() {
        let dir = TempDir::new().unwrap();
        write_artifact(
            dir.path(),
            "localhost",
            "EvidenceStorage",
            r#"{"address":"0x5FbDB2315678afecb367f032d93F642f64180aa3","abi":[]}"#,
        );

        let address = resolve_contract_address("EvidenceStorage", "localhost", dir.path()).unwrap();
        assert_eq!(
            address,
            "0x5FbDB2315678afecb367f032d93F642f64180aa3"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let err = resolve_contract_address("EvidenceStorage", "sepolia", dir.path()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_missing_address_field() {
        let dir = TempDir::new().unwrap();
        write_artifact(dir.path(), "localhost", "EvidenceStorage", r#"{"abi":[]}"#);

        let err = resolve_contract_address("EvidenceStorage", "localhost", dir.path()).unwrap_err();
        assert!(err.to_string().contains("Address field not found"));
    }

    #[test]
    fn test_zero_address_rejected() {
        let dir = TempDir::new().unwrap();
        write_artifact(
            dir.path(),
            "localhost",
            "EvidenceStorage",
            r#"{"address":"0x0000000000000000000000000000000000000000"}"#,
        );

        assert!(resolve_contract_address("EvidenceStorage", "localhost", dir.path()).is_err());
    }

    #[test]
    fn test_config_address_takes_precedence() {
        let config = Config::from_toml_str(
            r#"
            [network]
            rpc_url = "http://localhost:8545"
            chain_id = 31337

            [contract]
            address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            deployments_dir = "/nonexistent"

            [database]
            url = "sqlite://evidence.db"
            "#,
        )
        .unwrap();

        assert!(contract_address_from_config(&config).is_ok());
    }

    #[test]
    fn test_blank_names_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_contract_address(" ", "localhost", dir.path()).is_err());
        assert!(resolve_contract_address("EvidenceStorage", "", dir.path()).is_err());
    }
}
