// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Registrar service.
//!
//! # Architecture
//!
//! ```text
//!   RegistrarDriver --req--> [RepSocket] --> xmsg-registrar thread
//!                                               |  one request at a time
//!                                               v
//!                                  publishers / subscribers databases
//!                                               ^
//!   front-end registrar <--req-- xmsg-registrar-sync thread (optional timer)
//! ```
//!
//! Bad requests are answered with an error status; the service keeps running.

use super::database::RegistrationDatabase;
use super::driver::RegistrarDriver;
use super::protocol::{decode_request, encode_reply, RequestData, RequestKind, Query};
use super::record::{OwnerType, Registration};
use crate::config::{RegistrarSettings, SUCCESS};
use crate::connection::RegAddress;
use crate::context::Context;
use crate::error::Result;
use crate::transport::RepSocket;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The two databases a registrar serves.
#[derive(Debug, Default)]
pub struct Registry {
    /// Publisher records.
    pub publishers: RegistrationDatabase,
    /// Subscriber records.
    pub subscribers: RegistrationDatabase,
}

impl Registry {
    /// Database holding `owner` records.
    pub fn database(&self, owner: OwnerType) -> &RegistrationDatabase {
        match owner {
            OwnerType::Publisher => &self.publishers,
            OwnerType::Subscriber => &self.subscribers,
        }
    }

    /// Serve one request. Always produces a reply.
    pub fn handle(&self, frames: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let topic = frames.first().cloned().unwrap_or_default();
        let sender = frames.get(1).cloned().unwrap_or_default();

        let (kind, _sender, data) = match decode_request(frames) {
            Ok(decoded) => decoded,
            Err(status) => {
                log::warn!("[registrar] {}", status);
                return encode_reply(&topic, &sender, &status, []);
            }
        };

        match self.execute(kind, data) {
            Ok(records) => encode_reply(&topic, &sender, SUCCESS, &records),
            Err(status) => {
                log::warn!("[registrar] {} failed: {}", kind, status);
                encode_reply(&topic, &sender, &status, [])
            }
        }
    }

    fn execute(
        &self,
        kind: RequestKind,
        data: RequestData,
    ) -> std::result::Result<HashSet<Registration>, String> {
        use OwnerType::{Publisher, Subscriber};
        use RequestKind as K;

        let record = |data: RequestData| match data {
            RequestData::Record(r) => Ok(r),
            _ => Err(format!("{} expects a registration", kind)),
        };
        let none = HashSet::new();

        match kind {
            K::RegisterPublisher | K::RegisterSubscriber => {
                let owner = if kind == K::RegisterPublisher { Publisher } else { Subscriber };
                self.database(owner)
                    .register(record(data)?)
                    .map_err(|e| e.to_string())?;
                Ok(none)
            }
            K::RemovePublisher | K::RemoveSubscriber => {
                let owner = if kind == K::RemovePublisher { Publisher } else { Subscriber };
                self.database(owner)
                    .remove(&record(data)?)
                    .map_err(|e| e.to_string())?;
                Ok(none)
            }
            K::RemoveAll => {
                let RequestData::Host(host) = data else {
                    return Err("removeAllRegistration expects a host".into());
                };
                let removed = self.publishers.remove_host(&host) + self.subscribers.remove_host(&host);
                log::debug!("[registrar] removed {} record(s) on {}", removed, host);
                Ok(none)
            }
            K::FindPublisher | K::RfindPublisher | K::SamePublisher => {
                self.query(kind, Publisher, record(data)?)
            }
            K::FindSubscriber | K::RfindSubscriber | K::SameSubscriber => {
                self.query(kind, Subscriber, record(data)?)
            }
            K::FilterPublisher | K::FilterSubscriber => {
                let owner = if kind == K::FilterPublisher { Publisher } else { Subscriber };
                let RequestData::Filter(filter) = data else {
                    return Err(format!("{} expects a filter", kind));
                };
                Ok(self.database(owner).filter(&filter))
            }
            K::AllPublisher => Ok(self.publishers.all()),
            K::AllSubscriber => Ok(self.subscribers.all()),
        }
    }

    fn query(
        &self,
        kind: RequestKind,
        owner: OwnerType,
        template: Registration,
    ) -> std::result::Result<HashSet<Registration>, String> {
        let topic = template.topic().map_err(|e| e.to_string())?;
        let db = self.database(owner);
        let records = if kind == RequestKind::query(Query::Find, owner) {
            db.find(&topic)
        } else if kind == RequestKind::query(Query::Rfind, owner) {
            db.rfind(&topic)
        } else {
            db.same(&topic)
        };
        Ok(records)
    }
}

/// A running registrar.
#[derive(Debug)]
pub struct Registrar {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    socket: Arc<RepSocket>,
    running: Arc<AtomicBool>,
    service: Option<JoinHandle<()>>,
    sync: Option<(Sender<()>, JoinHandle<()>)>,
}

impl Registrar {
    /// Bind `addr` and start serving.
    ///
    /// With a `frontend`, every local record is re-sent to it once per
    /// `settings.sync_interval`.
    pub fn start(
        ctx: &Arc<Context>,
        addr: SocketAddr,
        settings: RegistrarSettings,
        frontend: Option<RegAddress>,
    ) -> Result<Self> {
        let socket = Arc::new(ctx.rep_socket(addr)?);
        let local_addr = socket.local_addr();
        let registry = Arc::new(Registry::default());
        let running = Arc::new(AtomicBool::new(true));

        let frontend_driver = match frontend {
            Some(frontend) => {
                let sender = format!("registrar@{}", local_addr);
                Some(RegistrarDriver::new(ctx, frontend, sender)?.with_timeout(settings.request_timeout))
            }
            None => None,
        };

        let service = {
            let socket = Arc::clone(&socket);
            let registry = Arc::clone(&registry);
            let running = Arc::clone(&running);
            let slice = settings.poll_slice;
            #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
            thread::Builder::new()
                .name("xmsg-registrar".into())
                .spawn(move || serve(&socket, &registry, &running, slice))
                .expect("failed to spawn registrar thread")
        };

        let sync = frontend_driver
            .map(|driver| spawn_sync(driver, Arc::clone(&registry), settings.clone()));

        log::info!("[registrar] serving on {}", local_addr);
        Ok(Self {
            local_addr,
            registry,
            socket,
            running,
            service: Some(service),
            sync,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Databases served by this registrar.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Stop the sync timer and the service, then close the socket.
    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some((stop, handle)) = self.sync.take() {
            drop(stop);
            let _ = handle.join();
        }
        self.running.store(false, Ordering::Release);
        if let Some(service) = self.service.take() {
            let _ = service.join();
            self.socket.close();
            log::info!("[registrar] {} stopped", self.local_addr);
        }
    }
}

impl Drop for Registrar {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(socket: &RepSocket, registry: &Registry, running: &AtomicBool, slice: std::time::Duration) {
    while running.load(Ordering::Acquire) {
        let request = match socket.recv_timeout(slice) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                log::error!("[registrar] socket failed: {}", e);
                break;
            }
        };
        let reply = registry.handle(request.frames());
        if let Err(e) = request.reply(&reply) {
            log::debug!("[registrar] reply to {} lost: {}", request.peer_addr(), e);
        }
    }
}

fn spawn_sync(
    driver: RegistrarDriver,
    registry: Arc<Registry>,
    settings: RegistrarSettings,
) -> (Sender<()>, JoinHandle<()>) {
    let (stop_tx, stop_rx) = bounded::<()>(0);
    #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
    let handle = thread::Builder::new()
        .name("xmsg-registrar-sync".into())
        .spawn(move || loop {
            match stop_rx.recv_timeout(settings.sync_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
            let mut sent = 0;
            for owner in [OwnerType::Publisher, OwnerType::Subscriber] {
                for record in registry.database(owner).all() {
                    if let Err(e) = driver.add_registration(&record) {
                        log::warn!("[registrar] front-end sync of {} failed: {}", record.name, e);
                    } else {
                        sent += 1;
                    }
                    if !matches!(
                        stop_rx.recv_timeout(settings.sync_record_delay),
                        Err(RecvTimeoutError::Timeout)
                    ) {
                        return;
                    }
                }
            }
            log::debug!("[registrar] synced {} record(s) to {}", sent, driver.address());
        })
        .expect("failed to spawn registrar sync thread");
    (stop_tx, handle)
}
