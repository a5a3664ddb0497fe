//! Minimal DNS callback listener for blind host interactions
//!
//! Listens for DNS queries on a UDP port, takes the correlation id from the
//! first label of the queried name, and answers with 127.0.0.1.
//! Packets other than a well-formed question are ignored.

use super::{Interaction, InteractionStore, InteractionType};
use crate::error::{GauntletError, Result};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;

pub async fn bind(port: u16) -> Result<UdpSocket> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    UdpSocket::bind(addr)
        .await
        .map_err(|e| GauntletError::OobError(format!("cannot bind udp {addr}: {e}")))
}

pub async fn serve(socket: UdpSocket, store: InteractionStore) -> Result<()> {
    let mut buf = [0u8; 512];

    loop {
        let (len, remote_addr) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                debug!("DNS recv error: {}", e);
                continue;
            }
        };
        let packet = &buf[..len];
        let Some(question) = Question::parse(packet) else {
            continue;
        };

        if let Some(id) = question.correlation_id() {
            debug!("Blind host DNS interaction: {} ({}) from {}", id, question.name, remote_addr);
            store.lock().await.push(Interaction {
                id,
                protocol: InteractionType::Dns,
                remote_addr,
                timestamp: chrono::Utc::now(),
                raw_data: format!("DNS query for {}", question.name),
            });
        }

        if let Err(e) = socket.send_to(&question.answer(packet), remote_addr).await {
            debug!("DNS send error: {}", e);
        }
    }
}

const HEADER_LEN: usize = 12;

/// First question of a query: its dotted name and where the question ends
struct Question {
    name: String,
    end: usize,
}

impl Question {
    fn parse(packet: &[u8]) -> Option<Self> {
        let mut offset = HEADER_LEN;
        let mut labels = Vec::new();
        loop {
            let len = *packet.get(offset)? as usize;
            offset += 1;
            if len == 0 {
                break;
            }
            labels.push(String::from_utf8_lossy(packet.get(offset..offset + len)?).into_owned());
            offset += len;
        }
        // QTYPE and QCLASS
        let end = offset + 4;
        if labels.is_empty() || packet.len() < end {
            return None;
        }
        Some(Self {
            name: labels.join("."),
            end,
        })
    }

    fn correlation_id(&self) -> Option<String> {
        self.name
            .split('.')
            .next()
            .filter(|label| !label.is_empty())
            .map(str::to_ascii_lowercase)
    }

    /// Answers with one uncacheable A record for 127.0.0.1, so repeated
    /// lookups from the target reach the listener again
    fn answer(&self, packet: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.end + 16);
        out.extend_from_slice(&packet[..2]);
        out.extend_from_slice(&[0x81, 0x80, 0, 1, 0, 1, 0, 0, 0, 0]);
        out.extend_from_slice(&packet[HEADER_LEN..self.end]);
        // Name pointer to the question, type A, class IN, TTL 0, 4 bytes
        out.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0, 0, 0, 4, 127, 0, 0, 1]);
        out
    }
}
