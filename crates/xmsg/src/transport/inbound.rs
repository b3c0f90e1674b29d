// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Reader threads feeding decoded messages into bounded channels.
//!
//! Delivery is best effort: when the consumer falls behind and the inbox is
//! full, new messages are dropped, as a pub/sub transport would.

use super::frame_codec::{FrameCodec, Frames};
use crossbeam::channel::{Sender, TrySendError};
use std::io;
use std::net::TcpStream;
use std::thread::{self, JoinHandle};

/// Spawn a thread decoding messages from `stream` into `tx`.
///
/// The thread exits when the peer closes the link, the stream is shut down
/// locally, or every receiver of `tx` is gone.
pub(crate) fn spawn_reader(
    name: String,
    mut stream: TcpStream,
    max_size: usize,
    tx: Sender<Frames>,
) -> JoinHandle<()> {
    #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let mut codec = FrameCodec::new(max_size);
            loop {
                match codec.read_message(&mut stream) {
                    Ok(frames) => match tx.try_send(frames) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            log::debug!("[transport] {} inbox full, message dropped", name);
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    },
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        log::trace!("[transport] {} closed by peer", name);
                        break;
                    }
                    Err(e) => {
                        log::debug!("[transport] {} read failed: {}", name, e);
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn reader thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::net::{bind_listener, connect_stream};
    use crossbeam::channel::bounded;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_reader_drops_when_full() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut client =
            connect_stream(listener.local_addr().unwrap(), Duration::from_secs(1)).unwrap();
        let (server, _) = listener.accept().unwrap();

        let (tx, rx) = bounded(1);
        let handle = spawn_reader("test-reader".into(), server, 1024, tx);

        client.write_all(&FrameCodec::encode(&[b"a".as_slice()])).unwrap();
        client.write_all(&FrameCodec::encode(&[b"b".as_slice()])).unwrap();
        drop(client);
        handle.join().unwrap();

        assert_eq!(rx.recv().unwrap(), vec![b"a".to_vec()]);
        assert!(rx.try_recv().is_err());
    }
}
