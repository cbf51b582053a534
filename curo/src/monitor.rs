//! The uevent monitor thread.
//!
//! One background thread owns the netlink socket and blocks in `poll`
//! over it and an eventfd used for shutdown. Messages from anyone but the
//! kernel are discarded. The thread runs exactly while a notifier is
//! registered; stopping it is a write to the eventfd plus a join.

use std::io::IoSliceMut;
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::{
    cmsg_space,
    sys::socket::{
        bind, recvmsg, socket, AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol,
        SockType, UnixCredentials,
    },
};
use rustix::event::{eventfd, poll, EventfdFlags, PollFd, PollFlags};
use rustix::fd::{AsRawFd, OwnedFd};
use rustix::io::Errno;
use tracing::{debug, error, trace, warn};

use crate::service::ServiceInner;
use crate::uevent::{classify, MonitorEvent, Uevent};
use crate::{Error, Result};

const UEVENT_GROUPS_KERNEL: u32 = 1;

/// Errnos a uevent burst can produce transiently; the socket stays usable,
/// so the monitor keeps running through them.
fn recoverable(errno: nix::errno::Errno) -> bool {
    matches!(
        errno,
        nix::errno::Errno::ENOBUFS | nix::errno::Errno::EINTR
    )
}

/// Wakes the monitor thread out of its poll so it can exit.
pub(crate) struct ShutdownSignal {
    fd: OwnedFd,
}

impl ShutdownSignal {
    fn new() -> Result<Self> {
        Ok(Self {
            fd: eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?,
        })
    }

    pub(crate) fn raise(&self) {
        // The counter saturates; a failed write still leaves it readable.
        let _ = rustix::io::write(&self.fd, &1u64.to_ne_bytes());
    }
}

/// Owner handle for a running monitor thread.
pub(crate) struct MonitorHandle {
    shutdown: Arc<ShutdownSignal>,
    thread: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn stop(self) {
        self.shutdown.raise();
        if self.thread.join().is_err() {
            error!("monitor thread panicked");
        }
    }
}

pub(crate) struct Monitor {
    fd: OwnedFd,
    shutdown: Arc<ShutdownSignal>,
    service: Arc<ServiceInner>,
}

impl Monitor {
    /// Opens the kernel uevent socket and starts the monitor thread.
    pub(crate) fn spawn(service: Arc<ServiceInner>) -> Result<MonitorHandle> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )?;
        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, UEVENT_GROUPS_KERNEL))?;

        let shutdown = Arc::new(ShutdownSignal::new()?);
        let monitor = Monitor {
            fd,
            shutdown: Arc::clone(&shutdown),
            service,
        };
        let thread = std::thread::Builder::new()
            .name("curo-monitor".into())
            .spawn(move || monitor.run())?;
        Ok(MonitorHandle { shutdown, thread })
    }

    fn run(&self) {
        debug!("monitor thread running");
        loop {
            let mut fds = [
                PollFd::new(&self.fd, PollFlags::IN),
                PollFd::new(&self.shutdown.fd, PollFlags::IN),
            ];
            match poll(&mut fds, -1) {
                Ok(_) => {}
                Err(Errno::INTR) => continue,
                Err(err) => {
                    error!("poll failed: {err}");
                    break;
                }
            }
            if !fds[1].revents().is_empty() {
                break;
            }
            if let Err(err) = self.drain() {
                error!("uevent socket failed: {err}");
                break;
            }
        }
        debug!("monitor thread exiting");
    }

    /// Processes every queued message until the socket would block.
    fn drain(&self) -> Result<()> {
        loop {
            match self.read_message() {
                Ok(None) => continue,
                Ok(Some(buf)) => {
                    let Ok(s) = std::str::from_utf8(&buf) else {
                        continue;
                    };
                    let Ok(uevent) = Uevent::parse(s) else {
                        continue;
                    };
                    self.dispatch(&uevent);
                }
                Err(Error::Io(std::io::ErrorKind::WouldBlock)) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    fn read_message(&self) -> Result<Option<Vec<u8>>> {
        // From linux/kobject.h
        const UEVENT_BUFFER_SIZE: usize = 2048;

        let mut uevent_buf = vec![0; UEVENT_BUFFER_SIZE];
        let mut cmsg_buf = cmsg_space!(UnixCredentials);

        let bytes = {
            let mut iov = [IoSliceMut::new(&mut uevent_buf)];
            let msg = match recvmsg::<NetlinkAddr>(
                self.fd.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buf),
                MsgFlags::empty(),
            ) {
                Ok(msg) => msg,
                Err(errno) if recoverable(errno) => {
                    warn!("uevent recv hiccup, messages may be lost: {errno}");
                    return Ok(None);
                }
                Err(errno) => return Err(errno.into()),
            };

            // Ignore unknown senders.
            let Some(addr) = msg.address else {
                return Ok(None);
            };
            if !(addr.pid() == 0 && addr.groups() == UEVENT_GROUPS_KERNEL) {
                return Ok(None);
            }

            msg.bytes
        };

        uevent_buf.drain(bytes..);
        Ok(Some(uevent_buf))
    }

    fn dispatch(&self, uevent: &Uevent) {
        let Some(event) = classify(uevent, &self.service.config.controller) else {
            trace!("ignoring {:?} on {}", uevent.action, uevent.devpath);
            return;
        };
        debug!("dispatching {event:?}");
        match event {
            MonitorEvent::TypecPort { partner_added } => {
                self.service.handle_typec_event(partner_added)
            }
            MonitorEvent::UsbPowerSupply => self.service.handle_power_supply_event(),
            MonitorEvent::DeviceAdded { devpath } => self.service.handle_device_added(devpath),
            MonitorEvent::InterfaceBound { devpath, interface } => {
                self.service.handle_interface_bound(devpath, interface)
            }
            MonitorEvent::GadgetUdc { added } => self.service.handle_udc_event(added),
            MonitorEvent::ControllerOffline => self.service.handle_controller_offline(),
        }
    }
}
