//! Live upload progress reporting.
//!
//! Transfer code talks to the monitor through a [`MonitorHandle`], which
//! pushes events onto an unbounded channel and never waits. A single render
//! task owns the per-file table and redraws it on a fixed tick.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crossterm::cursor::MoveUp;
use crossterm::queue;
use crossterm::terminal::{self, Clear, ClearType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::types::{FileId, UploadStatus};

/// Default redraw interval.
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(200);

/// Width used when the terminal width is unknown.
const DEFAULT_WIDTH: usize = 100;

/// How progress is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// No output; events are dropped at the handle.
    Hidden,
    /// Redraw a status table every `refresh`.
    Terminal { refresh: Duration },
}

impl Default for MonitorMode {
    fn default() -> Self {
        MonitorMode::Terminal {
            refresh: DEFAULT_REFRESH,
        }
    }
}

/// Progress event sent to the monitor.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A file was observed.
    AddFile { id: FileId, path: PathBuf },
    /// More bytes of a file were read into a request body. Ignored once the
    /// file is settled.
    UpdateBytes { id: FileId, delta: u64 },
    /// A file changed state. `size` and `uploaded` replace the current
    /// values when present.
    Status {
        id: FileId,
        status: UploadStatus,
        size: Option<u64>,
        uploaded: Option<u64>,
    },
}

/// Cheap, cloneable sender side of the monitor.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandle {
    tx: Option<mpsc::UnboundedSender<MonitorEvent>>,
}

impl MonitorHandle {
    /// A handle that discards every event.
    pub fn hidden() -> Self {
        Self { tx: None }
    }

    /// Send an event. Never blocks; events after the monitor stopped are lost.
    pub fn send(&self, event: MonitorEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn add_file(&self, id: FileId, path: PathBuf) {
        self.send(MonitorEvent::AddFile { id, path });
    }

    pub fn update_bytes(&self, id: FileId, delta: u64) {
        self.send(MonitorEvent::UpdateBytes { id, delta });
    }

    pub fn set_status(&self, id: FileId, status: UploadStatus) {
        self.send(MonitorEvent::Status {
            id,
            status,
            size: None,
            uploaded: None,
        });
    }

    /// Replace a file's state and its count of bytes the store acknowledged.
    pub fn set_progress(&self, id: FileId, status: UploadStatus, uploaded: u64) {
        self.send(MonitorEvent::Status {
            id,
            status,
            size: None,
            uploaded: Some(uploaded),
        });
    }

    /// Mark a file as uploading with its size and already-acknowledged bytes.
    pub fn start_upload(&self, id: FileId, size: u64, uploaded: u64) {
        self.send(MonitorEvent::Status {
            id,
            status: UploadStatus::UploadInProgress,
            size: Some(size),
            uploaded: Some(uploaded),
        });
    }
}

/// One row of the monitor table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorEntry {
    pub path: PathBuf,
    pub size: u64,
    pub uploaded: u64,
    pub status: UploadStatus,
}

impl MonitorEntry {
    /// Upload progress in percent.
    pub fn percent(&self) -> f64 {
        if self.size == 0 {
            return 100.0;
        }
        (self.uploaded.min(self.size) as f64) * 100.0 / self.size as f64
    }
}

/// Per-file state as seen by the monitor, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct MonitorTable {
    entries: BTreeMap<FileId, MonitorEntry>,
}

impl MonitorTable {
    /// Apply one event.
    pub fn apply(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::AddFile { id, path } => {
                self.entries.insert(
                    id,
                    MonitorEntry {
                        path,
                        ..Default::default()
                    },
                );
            }
            MonitorEvent::UpdateBytes { id, delta } => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    if !entry.status.is_terminal() {
                        entry.uploaded += delta;
                    }
                }
            }
            MonitorEvent::Status {
                id,
                status,
                size,
                uploaded,
            } => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.status = status;
                    if let Some(size) = size {
                        entry.size = size;
                    }
                    if let Some(uploaded) = uploaded {
                        entry.uploaded = uploaded;
                    }
                }
            }
        }
    }

    pub fn get(&self, id: FileId) -> Option<&MonitorEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the status table for a terminal `width` columns wide.
    pub fn render(&self, width: usize) -> String {
        let mut out: String = String::from("Upload Status:\n");
        let mut skipped: usize = 0;
        let mut succeeded: usize = 0;

        for entry in self.entries.values() {
            let name: String = entry.path.display().to_string();
            let name_len: usize = name.chars().count();
            match entry.status {
                UploadStatus::UploadInProgress => {
                    let percent: f64 = entry.percent();
                    let bar_width: usize = width.saturating_sub(name_len + 12).max(10);
                    let filled: usize =
                        ((percent * bar_width as f64 / 100.0) as usize).min(bar_width);
                    out.push_str(&format!(
                        "{}: [{}{}] {:>6.2}%\n",
                        name,
                        "█".repeat(filled),
                        "-".repeat(bar_width - filled),
                        percent
                    ));
                }
                status => {
                    match status {
                        UploadStatus::PreviouslyUploaded => skipped += 1,
                        UploadStatus::UploadCompleted => succeeded += 1,
                        _ => {}
                    }
                    let text: String = status.to_string();
                    let pad: usize = width.saturating_sub(name_len + 1).max(text.len());
                    out.push_str(&format!("{}:{:>pad$}\n", name, text, pad = pad));
                }
            }
        }

        let total: usize = self.entries.len();
        out.push('\n');
        out.push_str(&format!(
            "Total: {}, Skipped: {}, Success: {}",
            total, skipped, succeeded
        ));
        if skipped + succeeded < total {
            out.push_str(&format!(", Remaining: {}", total - skipped - succeeded));
        }
        out.push('\n');
        out
    }
}

/// Running progress monitor.
pub struct ProgressMonitor {
    handle: MonitorHandle,
    task: Option<JoinHandle<MonitorTable>>,
}

impl ProgressMonitor {
    /// Start a monitor writing frames to stderr.
    pub fn start(mode: MonitorMode) -> Self {
        Self::start_with_writer(mode, Box::new(std::io::stderr()))
    }

    /// Start a monitor writing frames to `out`.
    ///
    /// Must be called from within a tokio runtime unless `mode` is hidden.
    pub fn start_with_writer(mode: MonitorMode, out: Box<dyn Write + Send>) -> Self {
        match mode {
            MonitorMode::Hidden => Self {
                handle: MonitorHandle::hidden(),
                task: None,
            },
            MonitorMode::Terminal { refresh } => {
                let (tx, rx) = mpsc::unbounded_channel::<MonitorEvent>();
                let task: JoinHandle<MonitorTable> =
                    tokio::spawn(render_loop(rx, refresh, terminal_width(), out));
                Self {
                    handle: MonitorHandle { tx: Some(tx) },
                    task: Some(task),
                }
            }
        }
    }

    /// A handle for sending events.
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Wait for the render task to draw its last frame.
    ///
    /// Completes once every other handle has been dropped.
    pub async fn finish(self) -> MonitorTable {
        let Self { handle, task } = self;
        drop(handle);
        match task {
            Some(task) => match task.await {
                Ok(table) => table,
                Err(e) => {
                    log::warn!("Progress monitor task failed: {}", e);
                    MonitorTable::default()
                }
            },
            None => MonitorTable::default(),
        }
    }
}

fn terminal_width() -> usize {
    match terminal::size() {
        Ok((columns, _)) if columns > 0 => columns as usize,
        _ => DEFAULT_WIDTH,
    }
}

/// Terminal rows a frame occupies, counting lines that wrap past `width`.
fn frame_rows(frame: &str, width: usize) -> usize {
    let width: usize = width.max(1);
    frame
        .lines()
        .map(|line| line.chars().count().div_ceil(width).max(1))
        .sum()
}

async fn render_loop(
    mut rx: mpsc::UnboundedReceiver<MonitorEvent>,
    refresh: Duration,
    width: usize,
    mut out: Box<dyn Write + Send>,
) -> MonitorTable {
    let mut table: MonitorTable = MonitorTable::default();
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_lines: usize = 0;
    let mut dirty: bool = false;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    table.apply(event);
                    dirty = true;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if dirty {
                    last_lines = draw(&mut out, &table, width, last_lines);
                    dirty = false;
                }
            }
        }
    }

    draw(&mut out, &table, width, last_lines);
    table
}

/// Replace the previous frame with the current one; returns the rows drawn.
fn draw(
    out: &mut Box<dyn Write + Send>,
    table: &MonitorTable,
    width: usize,
    previous: usize,
) -> usize {
    let frame: String = table.render(width);
    if let Err(e) = write_frame(out, &frame, previous) {
        log::debug!("Progress monitor write failed: {}", e);
    }
    frame_rows(&frame, width)
}

fn write_frame(
    out: &mut Box<dyn Write + Send>,
    frame: &str,
    previous: usize,
) -> std::io::Result<()> {
    if previous > 0 {
        let rows: u16 = u16::try_from(previous).unwrap_or(u16::MAX);
        queue!(out, MoveUp(rows), Clear(ClearType::FromCursorDown))?;
    }
    out.write_all(frame.as_bytes())?;
    out.flush()
}
