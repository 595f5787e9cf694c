// src/host.rs - Tokio host for the controller loop
//! Drives [`Controller::service`] until the program finishes or the host is
//! told to shut down. Paced mode runs one pass per interval tick, so
//! simulated time follows the wall clock at the DDA rate. Un-paced mode runs
//! passes back to back and only yields to the runtime now and then.

use tokio::sync::broadcast;

use crate::controller::{Controller, ProgramState};
use crate::motion::AxisVector;

/// Un-paced passes between yields to the tokio scheduler.
const YIELD_EVERY: u64 = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct HostReport {
    pub passes: u64,
    pub ticks: u64,
    pub program_state: ProgramState,
    /// Machine coordinates where the runtime stopped.
    pub position: AxisVector,
    pub interrupted: bool,
}

#[derive(Debug)]
pub struct MotionHost {
    controller: Controller,
    realtime: bool,
    passes: u64,
    shutdown_tx: broadcast::Sender<()>,
}

impl MotionHost {
    pub fn new(controller: Controller, realtime: bool) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { controller, realtime, passes: 0, shutdown_tx }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Sending on this stops [`run`](Self::run) at the next pass boundary.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn run(&mut self) -> HostReport {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tracing::info!("Host loop starting ({})", if self.realtime { "paced" } else { "un-paced" });
        let interrupted = if self.realtime {
            self.run_paced(&mut shutdown_rx).await
        } else {
            self.run_unpaced(&mut shutdown_rx).await
        };
        let report = self.report(interrupted);
        tracing::info!(
            "Host loop done after {} passes, {} ticks: {:?}, position {:?}",
            report.passes,
            report.ticks,
            report.program_state,
            report.position
        );
        report
    }

    async fn run_paced(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let machine = self.controller.machine();
        let period = machine.motion().clock().tick_period() * self.controller.ticks_per_pass();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Host loop shutting down");
                    self.controller.abort();
                    return true;
                }
                _ = &mut ctrl_c => {
                    tracing::info!("Interrupted, stopping motion");
                    self.controller.abort();
                    return true;
                }
                _ = interval.tick() => {
                    if self.pass() {
                        return false;
                    }
                }
            }
        }
    }

    async fn run_unpaced(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            if self.pass() {
                return false;
            }
            if self.passes % YIELD_EVERY != 0 {
                continue;
            }
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::info!("Host loop shutting down");
                    self.controller.abort();
                    return true;
                }
                _ = &mut ctrl_c => {
                    tracing::info!("Interrupted, stopping motion");
                    self.controller.abort();
                    return true;
                }
                _ = tokio::task::yield_now() => {}
            }
        }
    }

    /// One controller pass. True once everything is done.
    fn pass(&mut self) -> bool {
        self.controller.service();
        self.passes += 1;
        // nobody is at the machine to press cycle start
        if self.controller.is_stopped_at_hold() {
            tracing::info!("Program stop reached, resuming");
            self.controller.resume();
        }
        self.controller.is_idle()
    }

    fn report(&self, interrupted: bool) -> HostReport {
        let motion = self.controller.machine().motion();
        HostReport {
            passes: self.passes,
            ticks: motion.clock().ticks(),
            program_state: self.controller.program_state(),
            position: *motion.runtime_position(),
            interrupted,
        }
    }
}
