//! tokio-backed datagram socket
// (c) 2025 Ross Younger

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::trace;

use super::{DatagramSocket, ReadCallback, ReadResult};

/// A connected tokio UDP socket.
///
/// Datagrams already queued in the kernel are returned synchronously; otherwise
/// the read is parked on a task spawned with [`tokio::task::spawn_local`], so this
/// must be used from within a [`tokio::task::LocalSet`].
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<Rc<UdpSocket>>,
    pending: Option<JoinHandle<()>>,
}

impl UdpTransport {
    /// Binds to `local` and connects to `peer`
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self::from(socket))
    }

    fn socket(&self) -> std::io::Result<&Rc<UdpSocket>> {
        self.socket
            .as_ref()
            .ok_or_else(|| std::io::Error::from(ErrorKind::NotConnected))
    }
}

impl From<UdpSocket> for UdpTransport {
    fn from(socket: UdpSocket) -> Self {
        Self {
            socket: Some(Rc::new(socket)),
            pending: None,
        }
    }
}

fn read_into(socket: &UdpSocket, buf_size: usize) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::zeroed(buf_size);
    let n = socket.try_recv(&mut buf)?;
    buf.truncate(n);
    Ok(buf.freeze())
}

impl DatagramSocket for UdpTransport {
    fn read(&mut self, buf_size: usize, callback: ReadCallback) -> ReadResult {
        let socket = match self.socket() {
            Ok(s) => s.clone(),
            Err(e) => return ReadResult::Ready(Err(e)),
        };
        match read_into(&socket, buf_size) {
            Err(e) if e.kind() == ErrorKind::WouldBlock => (),
            other => return ReadResult::Ready(other),
        }
        trace!("read pending");
        self.pending = Some(tokio::task::spawn_local(async move {
            let result = loop {
                if let Err(e) = socket.readable().await {
                    break Err(e);
                }
                match read_into(&socket, buf_size) {
                    Err(e) if e.kind() == ErrorKind::WouldBlock => (),
                    other => break other,
                }
            };
            callback(result);
        }));
        ReadResult::Pending
    }

    fn local_address(&self) -> std::io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    fn peer_address(&self) -> std::io::Result<SocketAddr> {
        self.socket()?.peer_addr()
    }

    fn close(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
        self.socket = None;
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use tokio::net::UdpSocket;
    use tokio::task::LocalSet;

    use super::UdpTransport;
    use crate::transport::{DatagramSocket, ReadResult};

    async fn pair() -> (UdpTransport, UdpSocket) {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();
        let transport = UdpTransport::connect("127.0.0.1:0".parse().unwrap(), remote_addr)
            .await
            .unwrap();
        remote
            .connect(transport.local_address().unwrap())
            .await
            .unwrap();
        (transport, remote)
    }

    #[tokio::test]
    async fn pending_read_completes() {
        LocalSet::new()
            .run_until(async {
                let (mut transport, remote) = pair().await;
                let got: Rc<RefCell<Option<Bytes>>> = Rc::default();
                let got2 = got.clone();
                let r = transport.read(
                    1500,
                    Box::new(move |r: std::io::Result<Bytes>| {
                        *got2.borrow_mut() = Some(r.unwrap());
                    }),
                );
                assert!(matches!(r, ReadResult::Pending));

                let _ = remote.send(b"hello").await.unwrap();
                for _ in 0..100 {
                    if got.borrow().is_some() {
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
                assert_eq!(got.borrow().as_deref(), Some(&b"hello"[..]));
            })
            .await;
    }

    #[tokio::test]
    async fn queued_datagram_is_ready() {
        LocalSet::new()
            .run_until(async {
                let (mut transport, remote) = pair().await;
                let _ = remote.send(b"queued").await.unwrap();
                // give the kernel a moment to deliver over loopback
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                let called = Rc::new(Cell::new(false));
                let called2 = called.clone();
                let r = transport.read(
                    1500,
                    Box::new(move |_: std::io::Result<Bytes>| called2.set(true)),
                );
                match r {
                    ReadResult::Ready(Ok(b)) => assert_eq!(&b[..], b"queued"),
                    other => panic!("unexpected {other:?}"),
                }
                assert!(!called.get());
            })
            .await;
    }

    #[tokio::test]
    async fn closed_transport_errors() {
        LocalSet::new()
            .run_until(async {
                let (mut transport, _remote) = pair().await;
                transport.close();
                assert!(transport.local_address().is_err());
                assert!(matches!(
                    transport.read(1500, Box::new(|_: std::io::Result<Bytes>| ())),
                    ReadResult::Ready(Err(_))
                ));
            })
            .await;
    }
}
