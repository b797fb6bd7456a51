// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! ICMP Echo transport (spec §4.1, §6).
//!
//! The wire format is the standard ICMP header (`type, code, checksum`)
//! followed by a payload that we interpret ourselves: the first 4 bytes
//! are a 32-bit block id (native byte order — interop with anything but
//! ourselves is not required, per spec §6/§9), the rest is the block's
//! data. `pnet`'s generic `icmp` packet (not the echo-specific one,
//! which splits those 4 bytes into a 16-bit identifier and a 16-bit
//! sequence number) already matches this shape exactly, so we build on
//! top of it instead of the `echo_request`/`echo_reply` submodules the
//! teacher used for ordinary ping round trips.

use crate::error::{Error, Result};
use pnet::packet::icmp::{self, IcmpPacket, IcmpTypes, MutableIcmpPacket};
use pnet::packet::Packet;
use pnet::transport::TransportChannelType::Layer4;
use pnet::transport::TransportProtocol::Ipv4;
use pnet::transport::{self, TransportChannelType, TransportReceiver, TransportSender};
use std::io::ErrorKind;
use std::net::IpAddr;
use std::time::Duration;

/// Header (type+code+checksum) is 4 bytes; our own block-id field is
/// another 4, so any reply shorter than this can't carry a valid id.
pub const HEADER_LEN: usize = 8;

/// Minimum receive buffer we ask `pnet` for, per spec §4.1.
pub const MIN_RECV_BUFFER: usize = 1024 * 1024;

fn protocol_ipv4() -> TransportChannelType {
    use pnet::packet::ip::IpNextHeaderProtocols;
    Layer4(Ipv4(IpNextHeaderProtocols::Icmp))
}

/// Opens a raw ICMPv4 socket pair with a receive buffer of at least
/// [`MIN_RECV_BUFFER`] bytes.
pub fn open_socket(min_recv_buffer: usize) -> Result<(TransportSender, TransportReceiver)> {
    let buffer_size = min_recv_buffer.max(MIN_RECV_BUFFER);
    transport::transport_channel(buffer_size, protocol_ipv4()).map_err(|e| {
        if e.kind() == ErrorKind::PermissionDenied {
            Error::Permission
        } else {
            Error::Network(e.to_string())
        }
    })
}

/// Builds a raw ICMP Echo Request with the given block id and payload.
///
/// Panics if `block_id == 0`: every caller in this crate filters that
/// out before reaching the wire (many Internet hosts mangle id 0), so
/// seeing it here is a programming error, not a runtime condition.
pub fn build_request(block_id: u32, data: &[u8]) -> Vec<u8> {
    build(IcmpTypes::EchoRequest, block_id, data)
}

fn build(icmp_type: pnet::packet::icmp::IcmpType, block_id: u32, data: &[u8]) -> Vec<u8> {
    assert_ne!(block_id, 0, "refusing to build an ICMP packet with id 0");
    let mut buf = vec![0u8; HEADER_LEN - 4 + 4 + data.len()];
    {
        let mut pkt = MutableIcmpPacket::new(&mut buf).expect("buffer sized for icmp header");
        pkt.set_icmp_type(icmp_type);
        pkt.set_icmp_code(pnet::packet::icmp::IcmpCode::new(0));
        let mut payload = vec![0u8; 4 + data.len()];
        payload[0..4].copy_from_slice(&block_id.to_ne_bytes());
        payload[4..].copy_from_slice(data);
        pkt.set_payload(&payload);
        let csum = icmp::checksum(&IcmpPacket::new(pkt.packet()).unwrap());
        pkt.set_checksum(csum);
    }
    buf
}

/// A parsed, validated Echo Reply.
#[derive(Debug, Clone)]
pub struct ParsedReply {
    pub block_id: u32,
    pub payload: Vec<u8>,
}

/// Parses `bytes` as an Echo Reply. Returns `None` on anything that
/// doesn't look like one (wrong type/code, too short) rather than an
/// error — malformed or foreign ICMP traffic is expected background
/// noise on a raw socket, not a fault (spec §4.1 `RecvOne`).
pub fn parse_reply(bytes: &[u8]) -> Option<ParsedReply> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let pkt = IcmpPacket::new(bytes)?;
    if pkt.get_icmp_type() != IcmpTypes::EchoReply {
        return None;
    }
    if pkt.get_icmp_code().0 != 0 {
        return None;
    }
    let payload = pkt.payload();
    if payload.len() < 4 {
        return None;
    }
    let block_id = u32::from_ne_bytes(payload[0..4].try_into().unwrap());
    Some(ParsedReply {
        block_id,
        payload: payload[4..].to_vec(),
    })
}

/// Re-verifies the checksum of a reply, for use during calibration
/// (spec §4.1: "optional checksum re-verification").
pub fn verify_checksum(bytes: &[u8]) -> bool {
    match IcmpPacket::new(bytes) {
        Some(pkt) => icmp::checksum(&pkt) == pkt.get_checksum(),
        None => false,
    }
}

/// Sends an Echo Request with `block_id`/`data` to `dst`.
pub fn send(tx: &mut TransportSender, dst: IpAddr, block_id: u32, data: &[u8]) -> Result<()> {
    let buf = build_request(block_id, data);
    let pkt = IcmpPacket::new(&buf).expect("just built this packet");
    tx.send_to(pkt, dst)
        .map(|_| ())
        .map_err(|e| Error::Network(e.to_string()))
}

/// Blocks up to `timeout` for one Echo Reply. `None` on timeout or a
/// packet that doesn't parse as a valid reply.
pub fn recv_one(
    rx: &mut TransportReceiver,
    timeout: Duration,
) -> Result<Option<(IpAddr, u32, Vec<u8>)>> {
    let mut iter = transport::icmp_packet_iter(rx);
    match iter
        .next_with_timeout(timeout)
        .map_err(|e| Error::Network(e.to_string()))?
    {
        Some((packet, addr)) => match parse_reply(packet.packet()) {
            Some(reply) => Ok(Some((addr, reply.block_id, reply.payload))),
            None => Ok(None),
        },
        None => Ok(None),
    }
}

/// The sending half of an ICMP Echo transport. Exists so
/// [`crate::blockstore::BlockStore`] can run against either a real raw
/// socket or an in-process fake for tests (spec §6 "test tooling").
pub trait IcmpSender: Send {
    fn send(&mut self, dst: IpAddr, block_id: u32, data: &[u8]) -> Result<()>;
}

/// The receiving half; see [`IcmpSender`].
pub trait IcmpReceiver: Send {
    fn recv(&mut self, timeout: Duration) -> Result<Option<(IpAddr, u32, Vec<u8>)>>;
}

impl IcmpSender for TransportSender {
    fn send(&mut self, dst: IpAddr, block_id: u32, data: &[u8]) -> Result<()> {
        send(self, dst, block_id, data)
    }
}

impl IcmpReceiver for TransportReceiver {
    fn recv(&mut self, timeout: Duration) -> Result<Option<(IpAddr, u32, Vec<u8>)>> {
        recv_one(self, timeout)
    }
}
