//! The two control loops that make up a tracker's core: periodic
//! storage-liveness supervision (`health_prober`) and leader election
//! plus leadership maintenance (`election_loop`), built on the framed
//! I/O in `net` and the single-peer status exchange in `status_sampler`.

pub mod election_loop;
pub mod health_prober;
pub mod net;
pub mod status_sampler;

pub use election_loop::{ElectionHandle, ElectionLoop, SelectError};
pub use health_prober::{HealthProber, ProberHandle};
pub use status_sampler::{RunningStatus, SampleError, Timeouts};
