//! Edge monitor shared by the kernel-backed drivers
//!
//! One background thread per driver instance blocks in `epoll_wait` on every
//! armed pin's descriptor plus an `eventfd`. When a pin descriptor wakes, the
//! thread asks its [`EdgeSource`] which edge fired and dispatches to the
//! controller's subscribers. Stopping the monitor signals the `eventfd` and
//! joins the thread.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use devio_core::error::{GpioError, GpioResult};
use devio_core::events::EventSink;
use devio_core::pin::{PinEventTypes, PinValue};

use crate::handle::{EpollHandle, EventFd};

const WAKE_TOKEN: u64 = u64::MAX;
const MAX_EVENTS: usize = 16;

/// A pin descriptor the monitor can wait on
pub(crate) trait EdgeSource: Send {
    fn raw_fd(&self) -> RawFd;

    /// Consume the pending notification; `None` means nothing to report
    fn read_edge(&mut self) -> io::Result<Option<PinEventTypes>>;

    /// Current level, read through the armed descriptor
    fn read_level(&self) -> io::Result<PinValue>;
}

type SourceMap = HashMap<u32, Box<dyn EdgeSource>>;

pub(crate) struct EdgeMonitor {
    name: String,
    epoll: Arc<EpollHandle>,
    wakeup: Arc<EventFd>,
    sources: Arc<Mutex<SourceMap>>,
    sink: EventSink,
    thread: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl EdgeMonitor {
    pub fn new(name: impl Into<String>, sink: EventSink) -> GpioResult<Self> {
        let epoll = EpollHandle::new().map_err(|e| GpioError::native("epoll_create1", e))?;
        let wakeup = EventFd::new().map_err(|e| GpioError::native("eventfd", e))?;
        epoll
            .add(wakeup.as_raw_fd(), libc::EPOLLIN as u32, WAKE_TOKEN)
            .map_err(|e| GpioError::native("epoll_ctl(eventfd)", e))?;

        Ok(Self {
            name: name.into(),
            epoll: Arc::new(epoll),
            wakeup: Arc::new(wakeup),
            sources: Arc::new(Mutex::new(HashMap::new())),
            sink,
            thread: None,
            thread_id: None,
        })
    }

    /// Watch `source` for `pin` and make sure the thread is running
    pub fn add(&mut self, pin: u32, source: Box<dyn EdgeSource>, events: u32) -> GpioResult<()> {
        let fd = source.raw_fd();
        {
            let mut sources = self.sources.lock();
            if sources.contains_key(&pin) {
                return Err(GpioError::invalid_operation(format!(
                    "Pin {} is already watched for edges",
                    pin
                )));
            }
            sources.insert(pin, source);
        }

        if let Err(e) = self.epoll.add(fd, events, pin as u64) {
            self.sources.lock().remove(&pin);
            return Err(GpioError::native(format!("epoll_ctl(add pin {})", pin), e));
        }

        if let Err(e) = self.ensure_running() {
            self.remove(pin);
            return Err(e);
        }
        Ok(())
    }

    /// Stop watching `pin`, handing its source back
    pub fn remove(&mut self, pin: u32) -> Option<Box<dyn EdgeSource>> {
        let source = self.sources.lock().remove(&pin)?;
        if let Err(e) = self.epoll.delete(source.raw_fd()) {
            log::warn!("{}: failed to stop watching pin {}: {}", self.name, pin, e);
        }
        Some(source)
    }

    pub fn watched_pins(&self) -> usize {
        self.sources.lock().len()
    }

    /// Level of an armed pin, `None` when the pin is not watched
    pub fn read_level(&self, pin: u32) -> Option<io::Result<PinValue>> {
        self.sources.lock().get(&pin).map(|source| source.read_level())
    }

    fn ensure_running(&mut self) -> GpioResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let epoll = Arc::clone(&self.epoll);
        let sources = Arc::clone(&self.sources);
        let sink = Arc::clone(&self.sink);
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_loop(&name, &epoll, &sources, &sink))
            .map_err(|e| GpioError::native("spawn edge monitor", e))?;

        self.thread_id = Some(handle.thread().id());
        self.thread = Some(handle);
        log::debug!("{}: monitor thread started", self.name);
        Ok(())
    }

    /// Wake and join the monitor thread, then drop every source
    pub fn stop(&mut self) -> GpioResult<()> {
        let mut result = Ok(());
        if let Some(handle) = self.thread.take() {
            log::debug!(
                "{}: stopping with {} pins watched",
                self.name,
                self.watched_pins()
            );
            if let Err(e) = self.wakeup.signal() {
                result = Err(GpioError::native("eventfd write", e));
            }
            if self.thread_id.take() == Some(thread::current().id()) {
                // Disposed from a callback: the loop exits after this dispatch.
                log::debug!("{}: stopped from its own thread", self.name);
            } else if handle.join().is_err() {
                log::error!("{}: monitor thread panicked", self.name);
            }
        }
        self.sources.lock().clear();
        result
    }
}

impl Drop for EdgeMonitor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}: {}", self.name, e);
        }
    }
}

fn run_loop(name: &str, epoll: &EpollHandle, sources: &Mutex<SourceMap>, sink: &EventSink) {
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

    loop {
        let ready = match epoll.wait(&mut events, -1) {
            Ok(ready) => ready,
            Err(e) => {
                log::error!("{}: epoll_wait failed, monitor exiting: {}", name, e);
                return;
            }
        };

        for event in &events[..ready] {
            let token = event.u64;
            if token == WAKE_TOKEN {
                log::debug!("{}: monitor thread exiting", name);
                return;
            }

            let pin = token as u32;
            // Read under the lock, dispatch without it.
            let edge = match sources.lock().get_mut(&pin) {
                Some(source) => source.read_edge(),
                None => continue,
            };

            match edge {
                Ok(Some(edge)) => {
                    sink.dispatch(pin, edge);
                }
                Ok(None) => {}
                Err(e) => log::error!("{}: failed to read edge on pin {}: {}", name, pin, e),
            }
        }
    }
}
