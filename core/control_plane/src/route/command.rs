//! OS route installation
//!
//! [`RouteCommand`] is the seam between the in-memory tables and the host's
//! routing table. Implementations must tolerate installing a route that is
//! already present and removing one that is already gone, since the tables
//! are updated before the command runs.

use std::io;
use std::process::Command;

/// Installs and removes host routes
pub trait RouteCommand: Send + Sync {
    /// Route `cidr` through the tunnel device `dev_name`
    fn set_route(&self, dev_name: &str, cidr: &str) -> io::Result<()>;

    /// Remove the route for `cidr`
    fn delete_route(&self, cidr: &str) -> io::Result<()>;
}

// ============================================================================
// Shell Implementation
// ============================================================================

/// Runs the platform's route tool (`ip` on Linux, `route` on macOS)
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRouteCommand;

#[cfg(target_os = "macos")]
pub fn add_route_cmd(dev_name: &str, cidr: &str) -> Vec<String> {
    ["route", "-n", "add", "-net", cidr, "-interface", dev_name]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(target_os = "macos")]
pub fn remove_route_cmd(cidr: &str) -> Vec<String> {
    ["route", "-n", "delete", "-net", cidr]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// stderr fragments meaning the route is already installed
#[cfg(target_os = "macos")]
const ADD_ALREADY_APPLIED: &[&str] = &["File exists"];

/// stderr fragments meaning the route is already gone
#[cfg(target_os = "macos")]
const DELETE_ALREADY_APPLIED: &[&str] = &["not in table"];

#[cfg(not(target_os = "macos"))]
pub fn add_route_cmd(dev_name: &str, cidr: &str) -> Vec<String> {
    // `replace` succeeds whether or not the route exists
    ["ip", "route", "replace", cidr, "dev", dev_name]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(not(target_os = "macos"))]
pub fn remove_route_cmd(cidr: &str) -> Vec<String> {
    ["ip", "route", "del", cidr]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(not(target_os = "macos"))]
const ADD_ALREADY_APPLIED: &[&str] = &["File exists"];

#[cfg(not(target_os = "macos"))]
const DELETE_ALREADY_APPLIED: &[&str] = &["No such process"];

/// Run `args`; a failure whose stderr contains one of `tolerated` counts as
/// success
fn run(args: &[String], tolerated: &[&str]) -> io::Result<()> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

    log::debug!("Running: {}", args.join(" "));
    let output = Command::new(program).args(rest).output()?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if tolerated.iter().any(|s| stderr.contains(s)) {
        log::debug!("'{}' already applied: {}", args.join(" "), stderr.trim());
        return Ok(());
    }

    log::warn!("'{}' failed ({}): {}", args.join(" "), output.status, stderr.trim());
    Err(io::Error::new(
        io::ErrorKind::Other,
        format!("{} exited with {}: {}", program, output.status, stderr.trim()),
    ))
}

impl RouteCommand for ShellRouteCommand {
    fn set_route(&self, dev_name: &str, cidr: &str) -> io::Result<()> {
        run(&add_route_cmd(dev_name, cidr), ADD_ALREADY_APPLIED)
    }

    fn delete_route(&self, cidr: &str) -> io::Result<()> {
        run(&remove_route_cmd(cidr), DELETE_ALREADY_APPLIED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_linux_commands() {
        assert_eq!(
            add_route_cmd("tun0", "10.0.0.0/8").join(" "),
            "ip route replace 10.0.0.0/8 dev tun0"
        );
        assert_eq!(remove_route_cmd("10.0.0.0/8").join(" "), "ip route del 10.0.0.0/8");
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_macos_commands() {
        assert_eq!(
            add_route_cmd("utun3", "10.0.0.0/8").join(" "),
            "route -n add -net 10.0.0.0/8 -interface utun3"
        );
        assert_eq!(
            remove_route_cmd("10.0.0.0/8").join(" "),
            "route -n delete -net 10.0.0.0/8"
        );
    }

    #[test]
    fn test_run_empty_command() {
        let err = run(&[], &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_run_missing_program() {
        let args = vec!["definitely-not-a-route-tool-xyz".to_string()];
        assert!(run(&args, ADD_ALREADY_APPLIED).is_err());
    }

    fn failing_with(stderr: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo '{}' >&2; exit 2", stderr),
        ]
    }

    #[test]
    fn test_tolerated_stderr_is_per_operation() {
        let gone = failing_with(DELETE_ALREADY_APPLIED[0]);
        assert!(run(&gone, DELETE_ALREADY_APPLIED).is_ok());
        assert!(run(&gone, ADD_ALREADY_APPLIED).is_err());

        let exists = failing_with(ADD_ALREADY_APPLIED[0]);
        assert!(run(&exists, ADD_ALREADY_APPLIED).is_ok());
        assert!(run(&exists, DELETE_ALREADY_APPLIED).is_err());
    }
}
