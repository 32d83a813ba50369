//! The instrument: acquisition, snap capture and the command surface on one
//! cooperative poll loop
//!
//! The host calls [`Instrument::update`] as fast as it can. Each call:
//!
//! 1. takes a sample if one is due (see [`Acquisition::tick`])
//! 2. feeds the stream buffer file while streaming is on
//! 3. completes a pending snap once its settle period has elapsed
//! 4. sends the next few lines of a snap being forwarded over the link
//!
//! A `snap` command only arms a [`SettleTimer`]; the window is extracted by a
//! later `update`, so sampling continues through the whole post-trigger wait
//! and through the live transfer. Live telemetry pauses while a snap frame
//! is on the link so the two never interleave.
//! The ring store has a single writer (the tick) and is read only between
//! ticks, within the same call.

use core::fmt::{self, Write};

use log::{error, info, warn};

use crate::acquisition::Acquisition;
use crate::adc::SampleSource;
use crate::command::Command;
use crate::config::SeesConfig;
use crate::error::{CaptureError, StoreError};
use crate::link::CommandChannel;
use crate::record::RecordShape;
use crate::snap::{Delivery, ForwardState, SettleTimer, SnapCapture, SnapForward};
use crate::storage::{FileNaming, SnapArchive, Storage, StreamRecorder};
use crate::telemetry::{MAX_LINE_LEN, SerialLink, TelemetryLine};

/// Prefix of operator notices on the serial link.
pub const NOTICE_PREFIX: &str = "[sees] ";

pub struct Instrument<R, A, L, S>
where
    R: RecordShape,
    A: SampleSource,
    L: SerialLink,
    S: Storage,
{
    acquisition: Acquisition<R>,
    capture: SnapCapture,
    pending: Option<SettleTimer>,
    forwarding: Option<SnapForward<R>>,
    archive: SnapArchive<S>,
    stream: StreamRecorder,
    source: A,
    link: L,
    streaming: bool,
}

impl<R, A, L, S> Instrument<R, A, L, S>
where
    R: RecordShape,
    A: SampleSource,
    L: SerialLink,
    S: Storage,
{
    /// Build an instrument; nothing is allocated until [`Self::begin`].
    ///
    /// Snaps and stream buffer files go to `dir` on `storage`.
    pub fn new(
        config: &SeesConfig,
        source: A,
        link: L,
        storage: S,
        dir: &'static str,
        naming: FileNaming,
    ) -> Self {
        let capacity = config.ring_capacity();
        Self {
            acquisition: Acquisition::new(
                config.detector,
                config.adc,
                config.sample_interval_us,
                capacity,
            ),
            capture: SnapCapture::new(config.snap_window_secs, config.snap_max_records()),
            pending: None,
            forwarding: None,
            archive: SnapArchive::new(storage, dir, naming).with_empty_snaps(config.keep_empty_snaps),
            stream: StreamRecorder::new(dir, naming, config.flush_every),
            source,
            link,
            streaming: config.stream_on_boot,
        }
    }

    /// Allocate the ring store, prepare storage and start sampling at `now_us`.
    ///
    /// An allocation failure is returned untouched: the caller must halt
    /// acquisition and show the fault indicator. Missing storage only
    /// degrades snap persistence.
    pub fn begin(&mut self, now_us: u32) -> Result<(), StoreError> {
        if let Err(e) = self.acquisition.begin() {
            error!("Acquisition halted: {}", e);
            self.notify(format_args!("FATAL: {}", e));
            return Err(e);
        }

        if !self.archive.begin() {
            self.notify(format_args!("storage unavailable; snaps will be forwarded only"));
        }

        self.acquisition.start(now_us);

        let store = self.acquisition.store();
        let (mode, capacity) = (R::MODE.label(), store.capacity());
        self.notify(format_args!("recording {} history, {} records", mode, capacity));

        if self.streaming {
            self.start_stream();
        }
        Ok(())
    }

    /// One pass of the poll loop.
    pub fn update(&mut self, now_us: u32) {
        let telemetry = if self.streaming && self.forwarding.is_none() {
            Some(&mut self.link)
        } else {
            None
        };

        if let Some(event) = self.acquisition.tick(now_us, &mut self.source, telemetry) {
            if self.stream.is_recording() {
                let line = TelemetryLine::from_event(&event, self.acquisition.origin_us()).render();
                self.stream.record(self.archive.storage_mut(), &line);
            }
        }

        if let Some(timer) = self.pending.filter(|t| t.is_elapsed(now_us)) {
            self.pending = None;
            self.finish_snap(timer);
        }

        self.pump_forward(now_us);
    }

    /// Drain queued command lines without blocking.
    pub fn poll_commands(&mut self, commands: &CommandChannel, now_us: u32) {
        while let Ok(line) = commands.try_receive() {
            // Failures are already reported on the link.
            let _ = self.handle_line(&line, now_us);
        }
    }

    /// Parse and run one command line. Blank lines yield `None`.
    pub fn handle_line(&mut self, line: &str, now_us: u32) -> Option<Result<(), CaptureError>> {
        Command::parse(line).map(|command| self.handle_command(command, now_us))
    }

    pub fn handle_command(&mut self, command: Command<'_>, now_us: u32) -> Result<(), CaptureError> {
        match command {
            Command::Snap => self.arm_snap(now_us),
            Command::StreamOn => {
                if !self.streaming {
                    self.streaming = true;
                    self.start_stream();
                }
                self.notify(format_args!("stream on"));
                Ok(())
            }
            Command::StreamOff => {
                self.stream.stop(self.archive.storage_mut());
                self.streaming = false;
                self.notify(format_args!("stream off"));
                Ok(())
            }
            Command::Unknown(word) => {
                self.notify(format_args!("unknown command: {}", word));
                Ok(())
            }
        }
    }

    /// Flush the stream buffer file before power-down or exit.
    pub fn shutdown(&mut self) {
        self.stream.stop(self.archive.storage_mut());
    }

    pub fn acquisition(&self) -> &Acquisition<R> {
        &self.acquisition
    }

    /// The snap waiting for its settle period, if any.
    pub fn snap_pending(&self) -> Option<&SettleTimer> {
        self.pending.as_ref()
    }

    /// Whether a snap is still being sent over the live link.
    pub fn snap_forwarding(&self) -> bool {
        self.forwarding.is_some()
    }

    pub fn next_snap_sequence(&self) -> u32 {
        self.capture.next_sequence()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_stream_recording(&self) -> bool {
        self.stream.is_recording()
    }

    pub fn storage_available(&self) -> bool {
        self.archive.is_available()
    }

    pub fn storage_mut(&mut self) -> &mut S {
        self.archive.storage_mut()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    fn arm_snap(&mut self, now_us: u32) -> Result<(), CaptureError> {
        let busy = self
            .pending
            .map(|timer| timer.sequence)
            .or_else(|| self.forwarding.as_ref().map(|f| f.snap().sequence));
        if let Some(sequence) = busy {
            let e = CaptureError::InProgress { sequence };
            self.notify(format_args!("snap rejected: {}", e));
            return Err(e);
        }

        match self.capture.arm(self.acquisition.store(), now_us) {
            Ok(timer) => {
                self.notify(format_args!(
                    "snap {} armed at {} us; collecting {} s",
                    timer.sequence,
                    timer.trigger_us,
                    self.capture.window_secs()
                ));
                self.pending = Some(timer);
                Ok(())
            }
            Err(e) => {
                self.notify(format_args!("snap rejected: {}", e));
                Err(e)
            }
        }
    }

    fn finish_snap(&mut self, timer: SettleTimer) {
        let snap = match self.capture.capture(
            self.acquisition.store(),
            timer.trigger_us,
            self.acquisition.origin_us(),
        ) {
            Ok(snap) => snap,
            Err(e) => {
                self.notify(format_args!("snap {} failed: {}", timer.sequence, e));
                return;
            }
        };

        let persisted = self.capture.persist(&snap, &mut self.archive);

        if snap.is_empty() {
            let delivery = Delivery::new(&snap, persisted, false);
            self.conclude(delivery);
        } else {
            self.forwarding = Some(SnapForward::new(snap, persisted));
        }
    }

    fn pump_forward(&mut self, now_us: u32) {
        let state = match self.forwarding.as_mut() {
            Some(forward) => forward.pump(&mut self.link, now_us),
            None => return,
        };
        if state == ForwardState::Sending {
            return;
        }

        if let Some(forward) = self.forwarding.take() {
            let delivery = forward.finish(state == ForwardState::Done);
            self.conclude(delivery);
        }
    }

    fn conclude(&mut self, delivery: Delivery) {
        match self.capture.conclude(delivery) {
            Ok(delivery) => self.report_delivery(&delivery),
            Err(e) => self.notify(format_args!("snap failed: {}", e)),
        }
    }

    fn report_delivery(&mut self, delivery: &Delivery) {
        if delivery.records == 0 {
            self.notify(format_args!(
                "{}: no records in window",
                delivery.identifier
            ));
            return;
        }

        match delivery.persisted {
            Some(Ok(())) if !delivery.forwarded => self.notify(format_args!(
                "{} saved ({} records); live transfer stalled",
                delivery.identifier, delivery.records
            )),
            Some(Ok(())) => self.notify(format_args!(
                "{} saved ({} records)",
                delivery.identifier, delivery.records
            )),
            Some(Err(e)) => self.notify(format_args!(
                "{} forwarded only ({} records); not saved: {}",
                delivery.identifier, delivery.records, e
            )),
            None => self.notify(format_args!(
                "{} forwarded ({} records)",
                delivery.identifier, delivery.records
            )),
        }
    }

    fn start_stream(&mut self) {
        let header = TelemetryLine::header();
        if !self.link.send_line(header) {
            warn!("Telemetry header dropped");
        }

        if self.archive.is_available() {
            if let Err(e) = self.stream.start(self.archive.storage_mut(), header) {
                self.notify(format_args!("stream buffer file unavailable: {}", e));
            }
        }
    }

    /// Log `args` and send it to the operator as a notice line.
    fn notify(&mut self, args: fmt::Arguments<'_>) {
        info!("{}", args);

        let mut line = heapless::String::<MAX_LINE_LEN>::new();
        let _ = line.push_str(NOTICE_PREFIX);
        // Over-long notices are cut at the line limit.
        let _ = line.write_fmt(args);
        if !self.link.send_line(&line) {
            warn!("Notice dropped by the serial link");
        }
    }
}
