// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Child processes.
//!
//! Each spawned process gets one reader thread per captured output stream
//! and one writer thread for stdin. The threads never touch scheduler
//! state: they push messages into a shared inbox and send the process's
//! notify. The notify callback drains the inbox on the scheduler thread
//! and invokes the stdio and write-completion callbacks there.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex};

use slab::Slab;
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::notify::Notify;
use crate::scheduler::Scheduler;
use crate::thread::OsThread;

const READ_CHUNK: usize = 64 * 1024;

/// Identity of a process within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId {
    index: usize,
    serial: u64,
}

/// Outcome carried by a [`StdioEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioStatus {
    /// `data` holds the next chunk.
    Data,
    /// The stream closed. No further events follow.
    Eof,
    /// Reading failed. No further events follow.
    Error(io::ErrorKind),
}

/// One delivery from a child's stdout or stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioEvent {
    pub data: Vec<u8>,
    pub status: StdioStatus,
}

pub type StdioCallback = Box<dyn FnMut(&mut Scheduler, ProcessId, StdioEvent)>;
type WriteCallback = Box<dyn FnOnce(&mut Scheduler, ProcessId, Vec<u8>, io::Result<()>)>;

/// How to start a child process.
///
/// Streams without a callback are connected to the null device. Setting
/// any variable with [`ProcessConfig::env`] replaces the inherited
/// environment.
pub struct ProcessConfig {
    path: PathBuf,
    cwd: Option<PathBuf>,
    args: Vec<OsString>,
    envs: Option<Vec<(OsString, OsString)>>,
    on_stdout: Option<StdioCallback>,
    on_stderr: Option<StdioCallback>,
}

impl ProcessConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cwd: None,
            args: Vec::new(),
            envs: None,
            on_stdout: None,
            on_stderr: None,
        }
    }

    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn on_stdout<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut Scheduler, ProcessId, StdioEvent) + 'static,
    {
        self.on_stdout = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_stderr<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut Scheduler, ProcessId, StdioEvent) + 'static,
    {
        self.on_stderr = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for ProcessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessConfig")
            .field("path", &self.path)
            .field("cwd", &self.cwd)
            .field("args", &self.args)
            .field("envs", &self.envs)
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

enum Message {
    Stdio(Stream, StdioEvent),
    Written(Vec<u8>, io::Result<()>),
}

type Inbox = Arc<Mutex<VecDeque<Message>>>;

pub(crate) struct ProcessEntry {
    serial: u64,
    child: Child,
    exit: Option<ExitStatus>,
    notify: Notify,
    inbox: Inbox,
    stdin: Option<mpsc::Sender<Vec<u8>>>,
    on_stdout: Option<StdioCallback>,
    on_stderr: Option<StdioCallback>,
    pending_writes: VecDeque<WriteCallback>,
    threads: Vec<OsThread>,
}

impl ProcessEntry {
    fn callback_slot(&mut self, stream: Stream) -> &mut Option<StdioCallback> {
        match stream {
            Stream::Stdout => &mut self.on_stdout,
            Stream::Stderr => &mut self.on_stderr,
        }
    }
}

/// Live processes of one scheduler, plus destroyed ones not yet exited.
pub(crate) struct ProcessTable {
    entries: Slab<ProcessEntry>,
    next_serial: u64,
    zombies: Vec<Child>,
}

impl ProcessTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Slab::new(),
            next_serial: 0,
            zombies: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn get_mut(&mut self, id: ProcessId) -> Option<&mut ProcessEntry> {
        self.entries
            .get_mut(id.index)
            .filter(|entry| entry.serial == id.serial)
    }

    fn entry_mut(&mut self, id: ProcessId) -> Result<&mut ProcessEntry> {
        self.get_mut(id).ok_or(RuntimeError::UnknownProcess(id))
    }

    /// Waits (without blocking) on destroyed children so they do not linger.
    pub(crate) fn poll_exited(&mut self) {
        self.zombies
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
    }

    /// Releases every process, returning their pump threads.
    pub(crate) fn shutdown(&mut self) -> Vec<OsThread> {
        let mut threads = Vec::new();
        for entry in self.entries.drain() {
            entry.notify.close();
            threads.extend(entry.threads);
        }
        threads
    }
}

impl Scheduler {
    /// Starts a child process.
    pub fn spawn_process(&mut self, config: ProcessConfig) -> Result<ProcessId> {
        let ProcessConfig {
            path,
            cwd,
            args,
            envs,
            on_stdout,
            on_stderr,
        } = config;

        let mut command = Command::new(&path);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(if on_stdout.is_some() { Stdio::piped() } else { Stdio::null() })
            .stderr(if on_stderr.is_some() { Stdio::piped() } else { Stdio::null() });
        if let Some(dir) = &cwd {
            command.current_dir(dir);
        }
        if let Some(envs) = envs {
            command.env_clear().envs(envs);
        }
        let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
            what: format!("process {}", path.display()),
            source,
        })?;
        let pid = child.id();

        let serial = self.processes.next_serial;
        self.processes.next_serial += 1;
        let id = ProcessId {
            index: self.processes.entries.vacant_key(),
            serial,
        };
        let notify = self.create_notify(move |sched| sched.dispatch_process(id));
        let inbox = Inbox::default();
        let mut threads = Vec::new();

        let stdin = match self.start_pumps(&mut child, &notify, &inbox, &mut threads) {
            Ok(stdin) => stdin,
            Err(err) => {
                let _ = child.kill();
                let _ = self.destroy_notify(notify.id());
                for thread in threads {
                    self.reap(thread);
                }
                self.processes.zombies.push(child);
                return Err(err);
            }
        };

        let index = self.processes.entries.insert(ProcessEntry {
            serial,
            child,
            exit: None,
            notify,
            inbox,
            stdin,
            on_stdout,
            on_stderr,
            pending_writes: VecDeque::new(),
            threads,
        });
        debug_assert_eq!(index, id.index);
        debug!(pid, path = %path.display(), "process spawned");
        Ok(id)
    }

    /// OS process id of the child.
    pub fn process_pid(&mut self, id: ProcessId) -> Result<u32> {
        Ok(self.processes.entry_mut(id)?.child.id())
    }

    /// Sends `signum` to the child.
    pub fn kill(&mut self, id: ProcessId, signum: i32) -> Result<()> {
        let entry = self.processes.entry_mut(id)?;
        if entry.exit.is_some() {
            return Err(io::Error::from_raw_os_error(libc::ESRCH).into());
        }
        let pid = libc::pid_t::try_from(entry.child.id())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        // SAFETY: kill(2) takes plain integers. `pid` is our child and has
        // not been reaped, so it cannot name another process.
        if unsafe { libc::kill(pid, signum) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        debug!(pid, signum, "signal sent");
        Ok(())
    }

    /// Queues `data` for the child's stdin.
    ///
    /// `on_written` runs on the scheduler thread once the write finished,
    /// getting the buffer back together with the write result. Writes
    /// complete in submission order. Once stdin is closed the buffer comes
    /// back inside [`RuntimeError::StdinClosed`] instead.
    pub fn write_stdin<F>(&mut self, id: ProcessId, data: Vec<u8>, on_written: F) -> Result<()>
    where
        F: FnOnce(&mut Scheduler, ProcessId, Vec<u8>, io::Result<()>) + 'static,
    {
        let entry = self.processes.entry_mut(id)?;
        let Some(stdin) = &entry.stdin else {
            return Err(RuntimeError::StdinClosed { process: id, data });
        };
        if let Err(mpsc::SendError(data)) = stdin.send(data) {
            return Err(RuntimeError::StdinClosed { process: id, data });
        }
        entry.pending_writes.push_back(Box::new(on_written));
        Ok(())
    }

    /// Closes the child's stdin once queued writes are flushed.
    pub fn close_stdin(&mut self, id: ProcessId) -> Result<()> {
        self.processes.entry_mut(id)?.stdin = None;
        Ok(())
    }

    /// Polls the exit status without blocking.
    pub fn try_wait(&mut self, id: ProcessId) -> Result<Option<ExitStatus>> {
        let entry = self.processes.entry_mut(id)?;
        if entry.exit.is_none() {
            entry.exit = entry.child.try_wait()?;
            if let Some(status) = entry.exit {
                debug!(pid = entry.child.id(), %status, "process exited");
            }
        }
        Ok(entry.exit)
    }

    /// Releases a process. It keeps running if it has not exited; pending
    /// write callbacks are dropped and pump threads are reaped.
    pub fn destroy_process(&mut self, id: ProcessId) -> Result<()> {
        self.processes.entry_mut(id)?;
        let ProcessEntry {
            mut child,
            exit,
            notify,
            threads,
            ..
        } = self.processes.entries.remove(id.index);
        self.destroy_notify(notify.id())?;
        for thread in threads {
            self.reap(thread);
        }
        if exit.is_none() && !matches!(child.try_wait(), Ok(Some(_))) {
            self.processes.zombies.push(child);
        }
        debug!(?id, "process destroyed");
        Ok(())
    }

    fn start_pumps(
        &self,
        child: &mut Child,
        notify: &Notify,
        inbox: &Inbox,
        threads: &mut Vec<OsThread>,
    ) -> Result<Option<mpsc::Sender<Vec<u8>>>> {
        let pid = child.id();
        if let Some(out) = child.stdout.take() {
            let (inbox, notify) = (inbox.clone(), notify.clone());
            threads.push(self.spawn_thread(&format!("out-{pid}"), move || {
                pump(out, Stream::Stdout, &inbox, &notify);
            })?);
        }
        if let Some(err) = child.stderr.take() {
            let (inbox, notify) = (inbox.clone(), notify.clone());
            threads.push(self.spawn_thread(&format!("err-{pid}"), move || {
                pump(err, Stream::Stderr, &inbox, &notify);
            })?);
        }
        let Some(mut stdin) = child.stdin.take() else {
            return Ok(None);
        };
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let (inbox, notify) = (inbox.clone(), notify.clone());
        threads.push(self.spawn_thread(&format!("in-{pid}"), move || {
            for data in rx {
                let result = stdin.write_all(&data).and_then(|()| stdin.flush());
                inbox.lock().unwrap().push_back(Message::Written(data, result));
                notify.send();
            }
        })?);
        Ok(Some(tx))
    }

    fn dispatch_process(&mut self, id: ProcessId) {
        loop {
            let Some(entry) = self.processes.get_mut(id) else {
                return;
            };
            let message = entry.inbox.lock().unwrap().pop_front();
            let Some(message) = message else {
                return;
            };
            match message {
                Message::Stdio(stream, event) => {
                    let Some(mut callback) = entry.callback_slot(stream).take() else {
                        continue;
                    };
                    callback(self, id, event);
                    if let Some(entry) = self.processes.get_mut(id) {
                        let slot = entry.callback_slot(stream);
                        if slot.is_none() {
                            *slot = Some(callback);
                        }
                    }
                }
                Message::Written(data, result) => {
                    if let Some(callback) = entry.pending_writes.pop_front() {
                        callback(self, id, data, result);
                    }
                }
            }
        }
    }
}

/// Reads `reader` to the end, forwarding every chunk.
fn pump<R: Read>(mut reader: R, stream: Stream, inbox: &Inbox, notify: &Notify) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let event = match reader.read(&mut buf) {
            Ok(0) => StdioEvent {
                data: Vec::new(),
                status: StdioStatus::Eof,
            },
            Ok(n) => StdioEvent {
                data: buf[..n].to_vec(),
                status: StdioStatus::Data,
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => StdioEvent {
                data: Vec::new(),
                status: StdioStatus::Error(e.kind()),
            },
        };
        let last = event.status != StdioStatus::Data;
        if notify.is_closed() {
            // Destroyed: keep draining so the child never blocks on a full pipe.
            if last {
                return;
            }
            continue;
        }
        inbox.lock().unwrap().push_back(Message::Stdio(stream, event));
        notify.send();
        if last {
            return;
        }
    }
}
