//! Per-session dispatch loop.
//!
//! One task per submission drains the session's [`DispatchQueue`]: each tick
//! picks the next recipient, draws a message variant and an inter-send gap,
//! attempts delivery, publishes the outcome, advances the cursor, and sleeps.
//! Pause parks the loop at the next tick boundary; a superseding submission
//! bumps the queue generation and the old loop discards itself once its
//! in-flight attempt resolves. At most one attempt is ever in flight per
//! session: a new loop waits for its predecessor task to finish first.

use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use volley_bus::EventBus;
use volley_core::config::PacingConfig;
use volley_core::events::{DispatchEvent, ThrottleReason};
use volley_core::ids::SessionName;
use volley_core::phone;
use volley_core::transport::Transport;
use volley_telemetry::MetricsRecorder;

use crate::queue::DispatchQueue;

/// Everything one scheduler task needs. The queue is shared with the
/// command side (submit/pause/continue mutate it between ticks); the
/// generation pins this task to the submission that spawned it.
pub(crate) struct SchedulerContext {
    pub session: SessionName,
    pub queue: Arc<Mutex<Option<DispatchQueue>>>,
    pub transport: Arc<dyn Transport>,
    pub bus: Arc<EventBus>,
    pub pacing: PacingConfig,
    pub resume: Arc<Notify>,
    pub cancel: CancellationToken,
    pub metrics: Arc<MetricsRecorder>,
    pub generation: u64,
}

/// What the next tick should do, decided under the queue lock.
enum Plan {
    /// Queue gone, superseded, exhausted, or stopped.
    Stop,
    /// Paused: wait for a continue command.
    Park,
    /// A pacing gate is closed: announce it and wait it out.
    Throttle(ThrottleReason, Duration),
    Attempt {
        recipient: String,
        message: String,
        index: usize,
        total: usize,
        delay: Duration,
    },
}

/// Which pacing gate, if any, blocks sending right now.
fn gate(
    pacing: &PacingConfig,
    local_hour: u32,
    sends_since_break: u32,
) -> Option<(ThrottleReason, Duration)> {
    if let Some(window) = &pacing.send_window {
        if !window.allows(local_hour) {
            return Some((ThrottleReason::QuietHours, window.recheck));
        }
    }
    if let Some(cooldown) = &pacing.cooldown {
        if cooldown.every > 0 && sends_since_break >= cooldown.every {
            return Some((ThrottleReason::Cooldown, cooldown.pause));
        }
    }
    None
}

/// Rounded 1-based progress after the attempt at `index` completes.
fn progress_percent(index: usize, total: usize) -> u8 {
    (100.0 * (index + 1) as f64 / total as f64).round() as u8
}

pub(crate) async fn run(ctx: SchedulerContext, predecessor: Option<JoinHandle<()>>) {
    // The previous submission's loop may still be waiting on a slow send.
    // Two attempts must never overlap for one session, so wait it out.
    if let Some(task) = predecessor {
        let _ = task.await;
    }

    loop {
        if ctx.cancel.is_cancelled() {
            return;
        }

        // Decide the tick under the lock, never awaiting while holding it.
        let plan = {
            let mut guard = ctx.queue.lock();
            let Some(queue) = guard.as_mut() else {
                return;
            };
            if queue.generation() != ctx.generation {
                return;
            }
            if queue.paused() {
                Plan::Park
            } else if !queue.running() {
                Plan::Stop
            } else if queue.is_exhausted() {
                queue.set_running(false);
                Plan::Stop
            } else if let Some((reason, wait)) = gate(
                &ctx.pacing,
                chrono::Local::now().hour(),
                queue.sends_since_break(),
            ) {
                if reason == ThrottleReason::Cooldown {
                    queue.reset_break_counter();
                }
                Plan::Throttle(reason, wait)
            } else {
                let index = queue.cursor();
                let total = queue.len();
                let recipient = queue.recipients()[index].clone();
                let mut rng = rand::thread_rng();
                let message = queue
                    .variants()
                    .choose(&mut rng)
                    .cloned()
                    .unwrap_or_default();
                let delay = ctx.pacing.delay.sample(&mut rng);
                Plan::Attempt {
                    recipient,
                    message,
                    index,
                    total,
                    delay,
                }
            }
        };

        match plan {
            Plan::Stop => return,
            Plan::Park => {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return,
                    _ = ctx.resume.notified() => {}
                }
            }
            Plan::Throttle(reason, wait) => {
                debug!(session = %ctx.session, ?reason, wait_secs = wait.as_secs(), "pacing gate closed");
                ctx.bus.publish(
                    &ctx.session,
                    DispatchEvent::Throttled {
                        reason,
                        next_delay_seconds: wait.as_secs(),
                    },
                );
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Plan::Attempt {
                recipient,
                message,
                index,
                total,
                delay,
            } => {
                let address = phone::normalize(&recipient);
                let outcome = ctx
                    .transport
                    .send(&ctx.session, &address, &message)
                    .await;

                // The queue may have been superseded while the send was in
                // flight; if so this outcome belongs to a dead submission.
                let finished = {
                    let mut guard = ctx.queue.lock();
                    let Some(queue) = guard.as_mut() else {
                        return;
                    };
                    if queue.generation() != ctx.generation {
                        return;
                    }
                    queue.advance();
                    let finished = queue.is_exhausted();
                    if finished {
                        queue.set_running(false);
                    }
                    finished
                };

                let labels = [("session", ctx.session.as_str())];
                ctx.metrics.histogram_observe(
                    "dispatch_tick_delay_seconds",
                    &labels,
                    delay.as_secs_f64(),
                );
                ctx.metrics.gauge_set(
                    "dispatch_queue_remaining",
                    &labels,
                    total.saturating_sub(index + 1) as f64,
                );

                let percent = progress_percent(index, total);
                match outcome {
                    Ok(()) => {
                        ctx.metrics.counter_inc("messages_sent", &labels, 1);
                        debug!(
                            session = %ctx.session,
                            recipient = %address,
                            progress = percent,
                            "message sent"
                        );
                        ctx.bus.publish(
                            &ctx.session,
                            DispatchEvent::Sent {
                                recipient: address,
                                message,
                                progress_percent: percent,
                                next_delay_seconds: delay.as_secs(),
                            },
                        );
                    }
                    Err(err) => {
                        ctx.metrics.counter_inc("messages_failed", &labels, 1);
                        warn!(
                            session = %ctx.session,
                            recipient = %address,
                            error = %err,
                            "delivery failed, advancing past recipient"
                        );
                        ctx.bus.publish(
                            &ctx.session,
                            DispatchEvent::Error {
                                recipient: address,
                                message,
                                progress_percent: percent,
                                next_delay_seconds: delay.as_secs(),
                                error_detail: err.to_string(),
                            },
                        );
                    }
                }

                if finished {
                    info!(session = %ctx.session, total, "dispatch complete");
                    ctx.bus
                        .publish(&ctx.session, DispatchEvent::Done { total_count: total });
                    return;
                }

                tokio::select! {
                    _ = ctx.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
