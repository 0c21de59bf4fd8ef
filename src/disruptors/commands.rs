//! Agent command line builders
//!
//! Each fault is translated into the argument vector understood by the agent
//! binary running in the injected container.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{DisruptorError, DisruptorResult};

/// Agent binary inside the agent container
pub const AGENT_BINARY: &str = "disruptor-agent";

/// Port the agent's proxy listens on unless told otherwise
pub const DEFAULT_PROXY_PORT: u16 = 8000;

/// Faults injected in HTTP requests served by the target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HttpFault {
    /// Port the target application serves on
    pub port: u16,
    /// Fraction of requests answered with an error (0.0 - 1.0)
    #[serde(default)]
    pub error_rate: f32,
    /// Status code returned for failed requests
    #[serde(default)]
    pub error_code: u16,
    /// Body returned for failed requests
    #[serde(default)]
    pub error_body: Option<String>,
    /// Average delay added to requests, in milliseconds
    #[serde(default)]
    pub average_delay_ms: u64,
    /// Variation of the delay, in milliseconds
    #[serde(default)]
    pub delay_variation_ms: u64,
    /// Paths excluded from fault injection
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Faults injected in gRPC requests served by the target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GrpcFault {
    /// Port the target application serves on
    pub port: u16,
    /// Fraction of requests answered with an error (0.0 - 1.0)
    #[serde(default)]
    pub error_rate: f32,
    /// gRPC status code returned for failed requests
    #[serde(default)]
    pub status_code: i32,
    /// Status message returned for failed requests
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub average_delay_ms: u64,
    #[serde(default)]
    pub delay_variation_ms: u64,
    /// Fully qualified services excluded from fault injection
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Packets dropped on the target's network interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NetworkFault {
    /// Port to drop traffic for. Zero drops all ports.
    #[serde(default)]
    pub port: u16,
    /// "tcp" or "udp". Empty drops both.
    #[serde(default)]
    pub protocol: String,
}

/// Options shared by proxy based faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FaultOptions {
    /// Port the agent's proxy listens on
    pub proxy_port: u16,
}

impl Default for FaultOptions {
    fn default() -> Self {
        Self {
            proxy_port: DEFAULT_PROXY_PORT,
        }
    }
}

/// Format a duration as the agent expects it
fn agent_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

fn validate_duration(duration: Duration) -> DisruptorResult<()> {
    if duration.is_zero() {
        return Err(DisruptorError::invalid_fault("duration must be greater than zero"));
    }
    Ok(())
}

fn validate_proxy(port: u16, options: &FaultOptions) -> DisruptorResult<()> {
    if port == 0 {
        return Err(DisruptorError::invalid_fault("target port must be set"));
    }
    if options.proxy_port == port {
        return Err(DisruptorError::invalid_fault(format!(
            "proxy port {} conflicts with target port",
            options.proxy_port
        )));
    }
    Ok(())
}

fn validate_rate(rate: f32, code_set: bool) -> DisruptorResult<()> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(DisruptorError::invalid_fault(format!(
            "error rate must be between 0.0 and 1.0, got {}",
            rate
        )));
    }
    if rate > 0.0 && !code_set {
        return Err(DisruptorError::invalid_fault(
            "an error code is required when error rate is set",
        ));
    }
    Ok(())
}

fn push_delay(args: &mut Vec<String>, average_ms: u64, variation_ms: u64) {
    if average_ms > 0 {
        args.push("--average-delay".to_string());
        args.push(agent_duration(Duration::from_millis(average_ms)));
    }
    if variation_ms > 0 {
        args.push("--delay-variation".to_string());
        args.push(agent_duration(Duration::from_millis(variation_ms)));
    }
}

fn push_exclude(args: &mut Vec<String>, exclude: &[String]) {
    if !exclude.is_empty() {
        args.push("-x".to_string());
        args.push(exclude.join(","));
    }
}

fn push_ports(args: &mut Vec<String>, target: u16, options: &FaultOptions) {
    args.push("--port".to_string());
    args.push(options.proxy_port.to_string());
    args.push("--target".to_string());
    args.push(target.to_string());
}

/// Command injecting HTTP faults for the given duration
pub fn http_command(
    fault: &HttpFault,
    duration: Duration,
    options: &FaultOptions,
) -> DisruptorResult<Vec<String>> {
    validate_duration(duration)?;
    validate_proxy(fault.port, options)?;
    validate_rate(fault.error_rate, fault.error_code != 0)?;

    let mut args = vec![
        AGENT_BINARY.to_string(),
        "http".to_string(),
        "--duration".to_string(),
        agent_duration(duration),
    ];

    if fault.error_rate > 0.0 {
        args.push("--rate".to_string());
        args.push(fault.error_rate.to_string());
        args.push("--error".to_string());
        args.push(fault.error_code.to_string());
        if let Some(body) = fault.error_body.as_ref().filter(|b| !b.is_empty()) {
            args.push("--body".to_string());
            args.push(body.clone());
        }
    }

    push_delay(&mut args, fault.average_delay_ms, fault.delay_variation_ms);
    push_exclude(&mut args, &fault.exclude);
    push_ports(&mut args, fault.port, options);

    Ok(args)
}

/// Command injecting gRPC faults for the given duration
pub fn grpc_command(
    fault: &GrpcFault,
    duration: Duration,
    options: &FaultOptions,
) -> DisruptorResult<Vec<String>> {
    validate_duration(duration)?;
    validate_proxy(fault.port, options)?;
    validate_rate(fault.error_rate, fault.status_code != 0)?;

    let mut args = vec![
        AGENT_BINARY.to_string(),
        "grpc".to_string(),
        "--duration".to_string(),
        agent_duration(duration),
    ];

    if fault.error_rate > 0.0 {
        args.push("--rate".to_string());
        args.push(fault.error_rate.to_string());
        args.push("--status".to_string());
        args.push(fault.status_code.to_string());
        if let Some(message) = fault.status_message.as_ref().filter(|m| !m.is_empty()) {
            args.push("--message".to_string());
            args.push(message.clone());
        }
    }

    push_delay(&mut args, fault.average_delay_ms, fault.delay_variation_ms);
    push_exclude(&mut args, &fault.exclude);
    push_ports(&mut args, fault.port, options);

    Ok(args)
}

/// Command dropping network traffic for the given duration
pub fn network_command(fault: &NetworkFault, duration: Duration) -> DisruptorResult<Vec<String>> {
    validate_duration(duration)?;

    let protocol = fault.protocol.to_lowercase();
    if !matches!(protocol.as_str(), "" | "tcp" | "udp") {
        return Err(DisruptorError::invalid_fault(format!(
            "unsupported protocol {:?}",
            fault.protocol
        )));
    }

    let mut args = vec![
        AGENT_BINARY.to_string(),
        "network-drop".to_string(),
        "--duration".to_string(),
        agent_duration(duration),
    ];
    if fault.port != 0 {
        args.push("--port".to_string());
        args.push(fault.port.to_string());
    }
    if !protocol.is_empty() {
        args.push("--protocol".to_string());
        args.push(protocol);
    }

    Ok(args)
}

/// Command restoring the target after an interrupted fault
pub fn cleanup_command() -> Vec<String> {
    vec![AGENT_BINARY.to_string(), "cleanup".to_string()]
}
