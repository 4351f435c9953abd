// SPDX-License-Identifier: AGPL-3.0
//! Minimal mDNS (RFC 6762) client: joins the `224.0.0.251:5353` multicast
//! group, sends a PTR query for the requested service type, and collects
//! PTR/SRV/TXT/A answers arriving within the query window into
//! [`ServiceDiscoveryRecord`]s.
//!
//! Hand-rolled wire parsing rather than a DNS crate, in the style of a
//! purpose-built UDP responder: this client only needs PTR/SRV/TXT/A
//! records, not general resolution.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use chrono::Utc;
use tokio::net::UdpSocket;

use crate::domain::discovery::ServiceDiscoveryRecord;

const MDNS_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_PORT: u16 = 5353;
const TYPE_PTR: u16 = 12;
const TYPE_TXT: u16 = 16;
const TYPE_SRV: u16 = 33;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

pub struct MdnsDiscovery {
    bind_addr: Ipv4Addr,
}

impl MdnsDiscovery {
    pub fn new(bind_addr: Ipv4Addr) -> Self {
        Self { bind_addr }
    }

    /// Query for `service_type` (e.g. `_sark._tcp.local.`) and collect
    /// answers for `timeout`.
    pub async fn query(&self, service_type: &str, timeout: Duration) -> anyhow::Result<Vec<ServiceDiscoveryRecord>> {
        let socket = UdpSocket::bind(SocketAddrV4::new(self.bind_addr, 0)).await?;
        socket.join_multicast_v4(MDNS_ADDR, self.bind_addr)?;

        let query = build_ptr_query(service_type);
        socket
            .send_to(&query, SocketAddrV4::new(MDNS_ADDR, MDNS_PORT))
            .await?;

        let mut records = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, _src))) => {
                    if let Ok(found) = parse_response(&buf[..len], service_type) {
                        records.extend(found);
                    }
                }
                _ => break,
            }
        }

        Ok(records)
    }
}

fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

fn build_ptr_query(service_type: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(32);
    packet.extend_from_slice(&0u16.to_be_bytes()); // id
    packet.extend_from_slice(&0u16.to_be_bytes()); // flags: standard query
    packet.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    packet.extend_from_slice(&0u16.to_be_bytes()); // ancount
    packet.extend_from_slice(&0u16.to_be_bytes()); // nscount
    packet.extend_from_slice(&0u16.to_be_bytes()); // arcount
    packet.extend(encode_name(service_type));
    packet.extend_from_slice(&TYPE_PTR.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    packet
}

fn read_name(data: &[u8], mut offset: usize) -> anyhow::Result<(String, usize)> {
    let mut labels = Vec::new();
    loop {
        if offset >= data.len() {
            anyhow::bail!("truncated name");
        }
        let len = data[offset] as usize;
        if len == 0 {
            offset += 1;
            break;
        }
        if len & 0xC0 == 0xC0 {
            // compression pointer: two bytes, lower 14 bits are the offset.
            if offset + 1 >= data.len() {
                anyhow::bail!("truncated compression pointer");
            }
            let pointer = (((len & 0x3F) as usize) << 8) | data[offset + 1] as usize;
            let (suffix, _) = read_name(data, pointer)?;
            labels.push(suffix);
            offset += 2;
            return Ok((labels.join("."), offset));
        }
        offset += 1;
        if offset + len > data.len() {
            anyhow::bail!("truncated label");
        }
        labels.push(String::from_utf8_lossy(&data[offset..offset + len]).into_owned());
        offset += len;
    }
    Ok((labels.join("."), offset))
}

fn parse_txt(data: &[u8]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut offset = 0;
    while offset < data.len() {
        let len = data[offset] as usize;
        offset += 1;
        if offset + len > data.len() {
            break;
        }
        let entry = String::from_utf8_lossy(&data[offset..offset + len]);
        if let Some((k, v)) = entry.split_once('=') {
            out.insert(k.to_string(), v.to_string());
        }
        offset += len;
    }
    out
}

fn parse_response(data: &[u8], service_type: &str) -> anyhow::Result<Vec<ServiceDiscoveryRecord>> {
    if data.len() < 12 {
        anyhow::bail!("packet too short");
    }
    let ancount = u16::from_be_bytes([data[6], data[7]]) as usize;
    let qdcount = u16::from_be_bytes([data[4], data[5]]) as usize;

    let mut offset = 12;
    for _ in 0..qdcount {
        let (_, next) = read_name(data, offset)?;
        offset = next + 4;
    }

    let mut srv_by_instance: HashMap<String, (String, u16)> = HashMap::new();
    let mut txt_by_instance: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut instances = Vec::new();

    for _ in 0..ancount {
        let (name, next) = read_name(data, offset)?;
        if next + 10 > data.len() {
            break;
        }
        let rtype = u16::from_be_bytes([data[next], data[next + 1]]);
        let rdlength = u16::from_be_bytes([data[next + 8], data[next + 9]]) as usize;
        let rdata_start = next + 10;
        if rdata_start + rdlength > data.len() {
            break;
        }
        let rdata = &data[rdata_start..rdata_start + rdlength];

        match rtype {
            TYPE_PTR => {
                if name.eq_ignore_ascii_case(service_type.trim_end_matches('.')) {
                    if let Ok((instance, _)) = read_name(data, rdata_start) {
                        instances.push(instance);
                    }
                }
            }
            TYPE_SRV if rdlength >= 6 => {
                let port = u16::from_be_bytes([rdata[4], rdata[5]]);
                if let Ok((target, _)) = read_name(data, rdata_start + 6) {
                    srv_by_instance.insert(name.clone(), (target, port));
                }
            }
            TYPE_TXT => {
                txt_by_instance.insert(name.clone(), parse_txt(rdata));
            }
            TYPE_A => {}
            _ => {}
        }

        offset = rdata_start + rdlength;
    }

    let now = Utc::now();
    let records = instances
        .into_iter()
        .filter_map(|instance| {
            let (hostname, port) = srv_by_instance.get(&instance)?.clone();
            Some(ServiceDiscoveryRecord {
                service_name: service_type.to_string(),
                instance_name: instance.clone(),
                hostname,
                port,
                txt_records: txt_by_instance.get(&instance).cloned().unwrap_or_default(),
                ttl: 120,
                discovered_at: now,
            })
        })
        .collect();

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_query_encodes_service_name() {
        let packet = build_ptr_query("_sark._tcp.local.");
        assert_eq!(&packet[4..6], &1u16.to_be_bytes());
        assert!(packet.windows(5).any(|w| w == b"_sark"));
    }

    #[test]
    fn txt_parses_key_value_pairs() {
        let mut data = Vec::new();
        let entry = b"version=2";
        data.push(entry.len() as u8);
        data.extend_from_slice(entry);
        let parsed = parse_txt(&data);
        assert_eq!(parsed.get("version"), Some(&"2".to_string()));
    }

    #[test]
    fn read_name_stops_at_root_label() {
        let mut data = encode_name("_sark._tcp.local.");
        data.extend_from_slice(&[0xAA, 0xBB]);
        let (name, offset) = read_name(&data, 0).unwrap();
        assert_eq!(name, "_sark._tcp.local");
        assert_eq!(&data[offset..], &[0xAA, 0xBB]);
    }
}
