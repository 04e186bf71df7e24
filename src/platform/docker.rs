//! [`ContainerPlatform`] backed by the `docker` command-line client.
//!
//! Each call runs one `docker` invocation and waits for it. Structured data
//! (`network inspect`, `inspect`) is decoded from the JSON the CLI prints;
//! failures are classified from stderr into `SubnetConflict`, `NotFound` or
//! a generic `CommandFailed`.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Command;
use std::process::Output;

use serde::Deserialize;
use snafu::ResultExt;
use tracing::debug;

use super::ContainerPlatform;
use super::ContainerSpec;
use super::IoSnafu;
use super::ParseSnafu;
use super::PlatformError;
use crate::subnet::Subnet;

/// Docker CLI client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    /// Use the given `docker` binary (name on `PATH` or absolute path).
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Run a command and return its raw output regardless of exit status.
    fn output(&self, args: &[&str]) -> Result<Output, PlatformError> {
        debug!(args = ?args, "Running docker command");

        Command::new(&self.binary).args(args).output().context(IoSnafu { operation: "docker" })
    }

    /// Run a command, mapping a non-zero exit into a classified error.
    fn run(&self, args: &[&str], target: Target<'_>) -> Result<Vec<u8>, PlatformError> {
        let output = self.output(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&self.binary, args, &stderr, target));
        }

        Ok(output.stdout)
    }

    fn run_lines(&self, args: &[&str]) -> Result<Vec<String>, PlatformError> {
        let stdout = self.run(args, Target::None)?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(|l| l.trim().trim_start_matches('/').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

/// What a command operated on, used to shape `NotFound` and conflict errors.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    None,
    Network(&'a str),
    Container(&'a str),
    Endpoint(&'a str),
    Image(&'a str),
    Subnet(Subnet),
}

fn classify_failure(binary: &str, args: &[&str], stderr: &str, target: Target<'_>) -> PlatformError {
    let lower = stderr.to_ascii_lowercase();

    if let Target::Subnet(subnet) = target
        && lower.contains("pool overlaps")
    {
        return PlatformError::SubnetConflict { subnet };
    }

    let missing = lower.contains("no such") || lower.contains("not found");
    if missing {
        let (kind, name) = match target {
            Target::Network(n) => ("network", n),
            Target::Container(n) => ("container", n),
            Target::Endpoint(n) => ("endpoint", n),
            Target::Image(n) => ("image", n),
            Target::None | Target::Subnet(_) => ("resource", ""),
        };
        if !name.is_empty() {
            return PlatformError::NotFound {
                kind,
                name: name.to_string(),
            };
        }
    }

    PlatformError::CommandFailed {
        command: format!("{} {}", binary, args.join(" ")),
        stderr: stderr.trim().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct NetworkInspect {
    #[serde(rename = "IPAM", default)]
    ipam: Option<IpamInspect>,
}

#[derive(Debug, Deserialize)]
struct IpamInspect {
    #[serde(rename = "Config", default)]
    config: Option<Vec<IpamPool>>,
}

#[derive(Debug, Deserialize)]
struct IpamPool {
    #[serde(rename = "Subnet", default)]
    subnet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "NetworkSettings")]
    network_settings: NetworkSettings,
}

#[derive(Debug, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "Networks", default)]
    networks: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Deserialize)]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// Extract IPv4 subnets from `docker network inspect` output.
///
/// IPv6 pools are skipped.
fn parse_network_subnets(network: &str, json: &[u8]) -> Result<Vec<Subnet>, PlatformError> {
    let inspected: Vec<NetworkInspect> = serde_json::from_slice(json).context(ParseSnafu {
        what: format!("network inspect output for {network}"),
    })?;

    Ok(inspected
        .into_iter()
        .filter_map(|n| n.ipam)
        .filter_map(|ipam| ipam.config)
        .flatten()
        .filter_map(|pool| pool.subnet)
        .filter_map(|s| s.parse::<Subnet>().ok())
        .collect())
}

/// Extract a container's address on `network` from `docker inspect` output.
fn parse_container_ip(container: &str, network: &str, json: &[u8]) -> Result<Ipv4Addr, PlatformError> {
    let inspected: Vec<ContainerInspect> = serde_json::from_slice(json).context(ParseSnafu {
        what: format!("inspect output for {container}"),
    })?;

    let endpoint = inspected
        .into_iter()
        .next()
        .and_then(|c| c.network_settings.networks.into_iter().find(|(name, _)| name == network))
        .map(|(_, e)| e)
        .ok_or_else(|| PlatformError::NotFound {
            kind: "endpoint",
            name: format!("{container}@{network}"),
        })?;

    endpoint.ip_address.parse().map_err(|_| PlatformError::UnexpectedOutput {
        what: format!("address of {container} on {network}"),
        detail: format!("{:?} is not an IPv4 address", endpoint.ip_address),
    })
}

fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--detach".to_string()];
    if spec.auto_remove {
        args.push("--rm".to_string());
    }
    args.push("--name".to_string());
    args.push(spec.name.clone());
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    for (host, container) in &spec.ports {
        args.push("--publish".to_string());
        args.push(format!("{host}:{container}"));
    }
    args.push(spec.image.clone());
    args
}

impl ContainerPlatform for DockerCli {
    fn list_containers(&self) -> Result<Vec<String>, PlatformError> {
        self.run_lines(&["ps", "--all", "--format", "{{.Names}}"])
    }

    fn list_networks(&self) -> Result<Vec<String>, PlatformError> {
        self.run_lines(&["network", "ls", "--format", "{{.Name}}"])
    }

    fn network_subnets(&self, network: &str) -> Result<Vec<Subnet>, PlatformError> {
        let stdout = self.run(&["network", "inspect", network], Target::Network(network))?;
        parse_network_subnets(network, &stdout)
    }

    fn create_network(&self, network: &str, subnet: Subnet) -> Result<(), PlatformError> {
        let cidr = subnet.to_string();
        self.run(&["network", "create", "--subnet", &cidr, network], Target::Subnet(subnet))?;
        Ok(())
    }

    fn remove_network(&self, network: &str) -> Result<(), PlatformError> {
        self.run(&["network", "rm", network], Target::Network(network))?;
        Ok(())
    }

    fn run_container(&self, spec: &ContainerSpec) -> Result<(), PlatformError> {
        let args = run_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args, Target::Image(&spec.image))?;
        Ok(())
    }

    fn remove_container(&self, container: &str) -> Result<(), PlatformError> {
        self.run(&["rm", "--force", container], Target::Container(container))?;
        Ok(())
    }

    fn connect(&self, network: &str, container: &str, ipv4: Option<Ipv4Addr>) -> Result<(), PlatformError> {
        match ipv4 {
            Some(ip) => {
                let ip = ip.to_string();
                self.run(&["network", "connect", "--ip", &ip, network, container], Target::Network(network))?;
            }
            None => {
                self.run(&["network", "connect", network, container], Target::Network(network))?;
            }
        }
        Ok(())
    }

    fn disconnect(&self, network: &str, container: &str) -> Result<(), PlatformError> {
        self.run(&["network", "disconnect", network, container], Target::Endpoint(container))?;
        Ok(())
    }

    fn container_ip(&self, container: &str, network: &str) -> Result<Ipv4Addr, PlatformError> {
        let stdout = self.run(&["inspect", container], Target::Container(container))?;
        parse_container_ip(container, network, &stdout)
    }

    fn container_logs(&self, container: &str) -> Result<Vec<u8>, PlatformError> {
        let output = self.output(&["logs", container])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&self.binary, &["logs", container], &stderr, Target::Container(container)));
        }
        let mut logs = output.stdout;
        logs.extend_from_slice(&output.stderr);
        Ok(logs)
    }

    fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), PlatformError> {
        let dir = context_dir.to_string_lossy();
        self.run(&["build", "--rm", "--no-cache", "--tag", tag, &dir], Target::None)?;
        Ok(())
    }

    fn remove_image(&self, tag: &str) -> Result<(), PlatformError> {
        self.run(&["rmi", tag], Target::Image(tag))?;
        Ok(())
    }

    fn prune_images(&self) -> Result<(), PlatformError> {
        self.run(&["image", "prune", "--force"], Target::None)?;
        Ok(())
    }
}
