//! Paced frame delivery for one session.
//!
//! A [`Pacer`] runs on its own thread and owns the session's
//! [`MediaStream`] (clip source, packetizer, UDP socket) while it runs.
//! When it stops, the stream is handed back through the thread's
//! `JoinHandle` so a later PLAY can resume from the same position.
//!
//! ## Cancellation
//!
//! The pacer is never interrupted. It polls the session's
//! [`PlaybackControl`] at the top of every iteration and stops once the
//! state is no longer PLAYING, so a PAUSE or TEARDOWN takes effect within
//! one frame interval plus one send.
//!
//! ## Pacing
//!
//! [`Pacing::Deadline`] keeps an absolute schedule
//! (`next = previous + interval`) and sleeps only the remainder, so time
//! spent reading and sending does not accumulate. [`Pacing::FixedSleep`]
//! sleeps the full interval after every frame; the effective rate drifts
//! below target by the per-frame processing time.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::media::{FrameSource, RtpPacketizer};
use crate::session::SessionState;
use crate::transport::UdpTransport;

/// Frames below this many bytes are rejected as implausible.
pub const DEFAULT_MIN_FRAME_SIZE: usize = 100;

/// ~30 frames per second.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Progress is logged every this many delivered frames.
const PROGRESS_EVERY: u64 = 30;

/// How the pacer waits between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Sleep until `previous deadline + interval`.
    #[default]
    Deadline,
    /// Sleep a constant interval after each send (drifts under load).
    FixedSleep,
}

impl fmt::Display for Pacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pacing::Deadline => f.write_str("deadline"),
            Pacing::FixedSleep => f.write_str("fixed-sleep"),
        }
    }
}

impl FromStr for Pacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deadline" => Ok(Pacing::Deadline),
            "fixed-sleep" => Ok(Pacing::FixedSleep),
            other => Err(format!(
                "unknown pacing '{other}', expected deadline or fixed-sleep"
            )),
        }
    }
}

/// Timing and sanity limits for a pacer.
#[derive(Debug, Clone, Copy)]
pub struct PacerConfig {
    pub frame_interval: Duration,
    pub pacing: Pacing,
    pub min_frame_size: usize,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            pacing: Pacing::default(),
            min_frame_size: DEFAULT_MIN_FRAME_SIZE,
        }
    }
}

#[derive(Debug)]
struct ControlState {
    state: SessionState,
    pacer_running: bool,
}

/// Playback state shared between a session and its pacer.
///
/// The state and the pacer's liveness sit under one lock: a pacer that
/// decides to stop clears its flag in the same critical section in which
/// it observed a non-PLAYING state, so a PLAY racing with that exit always
/// sees an accurate answer to "is a pacer still going to run?".
#[derive(Debug)]
pub struct PlaybackControl {
    inner: Mutex<ControlState>,
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlState {
                state: SessionState::Init,
                pacer_running: false,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Returns the previous state.
    pub fn set_state(&self, state: SessionState) -> SessionState {
        std::mem::replace(&mut self.inner.lock().state, state)
    }

    /// Enter PLAYING. Returns `true` if the caller must spawn a pacer,
    /// in which case the pacer is already accounted as running.
    pub fn start_playing(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.state = SessionState::Playing;
        if inner.pacer_running {
            false
        } else {
            inner.pacer_running = true;
            true
        }
    }

    pub fn is_pacer_running(&self) -> bool {
        self.inner.lock().pacer_running
    }

    /// Pacer-side poll: `true` while PLAYING; otherwise marks the pacer
    /// stopped and returns `false`.
    fn keep_playing(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Playing {
            true
        } else {
            inner.pacer_running = false;
            false
        }
    }

    /// Mark the pacer as gone without touching the state. Called by a
    /// pacer at the point it decides to give up, or by the session when a
    /// spawn fails.
    pub(crate) fn pacer_failed(&self) {
        self.inner.lock().pacer_running = false;
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a pacer needs to deliver one clip to one client.
pub struct MediaStream {
    pub resource: String,
    pub source: Box<dyn FrameSource>,
    pub packetizer: RtpPacketizer,
    pub transport: UdpTransport,
    pub destination: SocketAddr,
}

impl MediaStream {
    /// Close the clip source. The socket is released on drop.
    pub fn close(&mut self) {
        self.source.close();
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("resource", &self.resource)
            .field("packetizer", &self.packetizer)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Why a pacer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerExit {
    /// The session left PLAYING.
    Stopped,
    /// A datagram send failed. Fatal for this pacer only.
    TransportFailed,
    /// Reading or rewinding the clip failed.
    SourceFailed,
    /// The clip yields no frames at all.
    EmptyClip,
}

impl fmt::Display for PacerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacerExit::Stopped => f.write_str("session left PLAYING"),
            PacerExit::TransportFailed => f.write_str("transport send failed"),
            PacerExit::SourceFailed => f.write_str("frame source failed"),
            PacerExit::EmptyClip => f.write_str("clip has no frames"),
        }
    }
}

/// Result of a finished pacer; gives the stream back to the session.
#[derive(Debug)]
pub struct PacerOutcome {
    pub stream: MediaStream,
    pub exit: PacerExit,
    pub frames_sent: u64,
}

/// Frame-delivery loop bound to one session.
pub struct Pacer {
    session_id: String,
    stream: MediaStream,
    control: Arc<PlaybackControl>,
    config: PacerConfig,
}

impl Pacer {
    pub fn new(
        session_id: &str,
        stream: MediaStream,
        control: Arc<PlaybackControl>,
        config: PacerConfig,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            stream,
            control,
            config,
        }
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> io::Result<JoinHandle<PacerOutcome>> {
        thread::Builder::new()
            .name(format!("pacer-{}", self.session_id))
            .spawn(move || self.run())
    }

    /// Deliver frames until the session leaves PLAYING or delivery fails.
    pub fn run(mut self) -> PacerOutcome {
        tracing::info!(
            session_id = %self.session_id,
            resource = %self.stream.resource,
            destination = %self.stream.destination,
            ssrc = format_args!("{:#010X}", self.stream.packetizer.ssrc()),
            pacing = %self.config.pacing,
            "pacer started"
        );

        let mut frames_sent = 0u64;
        let exit = self.deliver(&mut frames_sent);

        tracing::info!(
            session_id = %self.session_id,
            frames_sent,
            reason = %exit,
            "pacer stopped"
        );

        PacerOutcome {
            stream: self.stream,
            exit,
            frames_sent,
        }
    }

    /// Frame loop. Every exit other than [`PacerExit::Stopped`] goes
    /// through [`fail`](Self::fail) so the running flag is cleared before
    /// the failure is reported.
    fn deliver(&mut self, frames_sent: &mut u64) -> PacerExit {
        let interval = self.config.frame_interval;
        let mut deadline = Instant::now();
        let mut read_since_reset = 0u64;
        let mut delivered_since_reset = 0u64;

        while self.control.keep_playing() {
            let frame = match self.stream.source.next_frame() {
                Ok(Some(frame)) => {
                    read_since_reset += 1;
                    frame
                }
                Ok(None) => {
                    if read_since_reset == 0 {
                        tracing::warn!(session_id = %self.session_id, "clip yielded no frames");
                        return self.fail(PacerExit::EmptyClip);
                    }
                    tracing::info!(
                        session_id = %self.session_id,
                        frames_sent = *frames_sent,
                        "end of clip, looping"
                    );
                    if let Err(e) = self.stream.source.reset() {
                        tracing::error!(session_id = %self.session_id, error = %e, "failed to rewind clip");
                        return self.fail(PacerExit::SourceFailed);
                    }
                    if delivered_since_reset == 0 {
                        // a full pass without a usable frame: wait instead of spinning
                        thread::sleep(interval);
                    }
                    read_since_reset = 0;
                    delivered_since_reset = 0;
                    continue;
                }
                Err(e) => {
                    tracing::error!(session_id = %self.session_id, error = %e, "failed to read frame");
                    return self.fail(PacerExit::SourceFailed);
                }
            };

            if frame.len() < self.config.min_frame_size {
                tracing::warn!(
                    session_id = %self.session_id,
                    frame = read_since_reset,
                    len = frame.len(),
                    min = self.config.min_frame_size,
                    "skipping implausibly small frame"
                );
                continue;
            }

            let packet = self.stream.packetizer.packetize(&frame, true);
            match self
                .stream
                .transport
                .send_packet(&packet, self.stream.destination)
            {
                Ok(bytes) => {
                    *frames_sent += 1;
                    delivered_since_reset += 1;
                    tracing::trace!(
                        session_id = %self.session_id,
                        seq = packet.sequence_number,
                        bytes,
                        "frame sent"
                    );
                    if *frames_sent % PROGRESS_EVERY == 0 {
                        tracing::debug!(
                            session_id = %self.session_id,
                            frames_sent = *frames_sent,
                            bytes,
                            "delivery progress"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %self.session_id,
                        destination = %self.stream.destination,
                        frames_sent = *frames_sent,
                        error = %e,
                        "RTP send failed"
                    );
                    return self.fail(PacerExit::TransportFailed);
                }
            }

            self.wait(&mut deadline, interval);
        }

        PacerExit::Stopped
    }

    fn fail(&self, exit: PacerExit) -> PacerExit {
        self.control.pacer_failed();
        exit
    }

    fn wait(&self, deadline: &mut Instant, interval: Duration) {
        match self.config.pacing {
            Pacing::FixedSleep => thread::sleep(interval),
            Pacing::Deadline => {
                *deadline += interval;
                let now = Instant::now();
                if *deadline > now {
                    thread::sleep(*deadline - now);
                } else if now - *deadline > interval {
                    // too far behind to catch up without a burst
                    *deadline = now;
                }
            }
        }
    }
}
