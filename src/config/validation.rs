//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, timeouts and the cache endpoint
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TrackerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{CacheBackend, TrackerConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("cache endpoint host is not set (config `cache.endpoint_host` or env ElastiCacheEndpoint)")]
    MissingEndpointHost,

    #[error("cache endpoint port must be non-zero")]
    MissingEndpointPort,

    #[error("cache discovery is disabled but `cache.nodes` is empty")]
    NoStaticNodes,

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error(
        "reconciler.deadline_ms ({deadline_ms}) plus one record's worst case ({record_ms} ms) \
         must fit in listener.request_timeout_secs ({timeout_ms} ms)"
    )]
    DeadlineTooLong {
        deadline_ms: u64,
        record_ms: u64,
        timeout_ms: u64,
    },
}

/// Longest one record can take once started: every attempt of the write
/// (incr, add, incr) and of the observation read, plus backoff between attempts.
pub fn worst_case_record_ms(config: &TrackerConfig) -> u64 {
    if config.cache.backend == CacheBackend::Memory {
        return 0;
    }
    let cache = &config.cache;
    let attempts = u64::from(config.retries.max_attempts.max(1));
    let backoff = (attempts - 1).saturating_mul(config.retries.max_delay_ms);

    let write = attempts
        .saturating_mul(cache.connect_timeout_ms.saturating_add(cache.io_timeout_ms.saturating_mul(3)))
        .saturating_add(backoff);
    let read = if config.reconciler.observe_reads {
        attempts
            .saturating_mul(cache.connect_timeout_ms.saturating_add(cache.io_timeout_ms))
            .saturating_add(backoff)
    } else {
        0
    };
    write.saturating_add(read)
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &TrackerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.cache.backend == CacheBackend::Memcached {
        let cache = &config.cache;
        if cache.discovery {
            if cache.endpoint_host.trim().is_empty() {
                errors.push(ValidationError::MissingEndpointHost);
            }
            if cache.endpoint_port == 0 {
                errors.push(ValidationError::MissingEndpointPort);
            }
        } else if cache.nodes.is_empty() {
            errors.push(ValidationError::NoStaticNodes);
        } else {
            // Hostnames are resolved at connect time, so only the port shape is checked here.
            for node in &cache.nodes {
                let port_ok = node
                    .rsplit_once(':')
                    .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p > 0))
                    .unwrap_or(false);
                if !port_ok {
                    errors.push(ValidationError::InvalidAddress {
                        field: "cache.nodes",
                        value: node.clone(),
                    });
                }
            }
        }

        for (field, value) in [
            ("cache.connect_timeout_ms", cache.connect_timeout_ms),
            ("cache.io_timeout_ms", cache.io_timeout_ms),
            ("cache.unhealthy_threshold", u64::from(cache.unhealthy_threshold)),
            ("cache.healthy_threshold", u64::from(cache.healthy_threshold)),
        ] {
            if value == 0 {
                errors.push(ValidationError::Zero { field });
            }
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::Zero {
            field: "retries.max_attempts",
        });
    }

    // The reconciler must hit its deadline and report before the HTTP timeout drops the handler.
    let timeout_ms = config.listener.request_timeout_secs.saturating_mul(1000);
    if config.reconciler.deadline_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "reconciler.deadline_ms",
        });
    } else {
        let record_ms = worst_case_record_ms(config);
        if config.reconciler.deadline_ms.saturating_add(record_ms) >= timeout_ms {
            errors.push(ValidationError::DeadlineTooLong {
                deadline_ms: config.reconciler.deadline_ms,
                record_ms,
                timeout_ms,
            });
        }
    }

    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "health_check.interval_secs",
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
