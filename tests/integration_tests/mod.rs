//! Integration tests module
//!
//! Every test here runs real coordinators and brokers on ephemeral
//! loopback ports, covering:
//! - Broker registration, eviction and re-election
//! - Client writes, follower replication and ordered delivery
//! - Secondary promotion and fencing of a stale primary

pub mod broker_test;
pub mod cluster_test;
pub mod failover_test;
pub mod fixtures;
