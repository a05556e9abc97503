//! AEGIS — in-line security gateway for UAV command-and-control traffic.
//!
//! The module layout mirrors the pipeline itself: ingress classifies
//! the sender (`classifier`), `mavlink` decodes frames, `authz` enforces the
//! sender×kind matrix, `detectors` run the parallel analysis stage,
//! `decision` aggregates risk into one of four states, and `audit` writes
//! the append-only trail. `gateway` wires all of it into the socket loop;
//! `admin` is the ambient health/metrics surface alongside it.

pub mod admin;
pub mod audit;
pub mod authz;
pub mod classifier;
pub mod config;
pub mod crypto;
pub mod decision;
pub mod detectors;
pub mod error;
pub mod gateway;
pub mod mavlink;
pub mod vehicle;
