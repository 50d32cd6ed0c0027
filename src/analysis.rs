//! Traffic summaries over stored packets, as shown on the dashboard

use std::collections::HashMap;
use std::net::IpAddr;

use crate::packet::{PacketRecord, Protocol};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Talker {
    pub address: IpAddr,
    pub packets: u64,
    pub bytes: u64,
}

/// Packet count per protocol, busiest first
pub fn protocol_distribution<'a, I>(records: I) -> Vec<(Protocol, u64)>
where
    I: IntoIterator<Item = &'a PacketRecord>,
{
    let mut counts: HashMap<Protocol, u64> = HashMap::new();
    for record in records {
        *counts.entry(record.protocol()).or_default() += 1;
    }
    let mut distribution: Vec<(Protocol, u64)> = counts.into_iter().collect();
    distribution.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    distribution
}

/// Source addresses by packet count, with their byte totals
pub fn top_talkers<'a, I>(records: I, limit: usize) -> Vec<Talker>
where
    I: IntoIterator<Item = &'a PacketRecord>,
{
    let mut talkers: HashMap<IpAddr, Talker> = HashMap::new();
    for record in records {
        let talker = talkers.entry(record.src_addr()).or_insert_with(|| Talker {
            address: record.src_addr(),
            packets: 0,
            bytes: 0,
        });
        talker.packets += 1;
        talker.bytes += record.length() as u64;
    }
    let mut ranked: Vec<Talker> = talkers.into_values().collect();
    ranked.sort_by(|a, b| b.packets.cmp(&a.packets).then(a.address.cmp(&b.address)));
    ranked.truncate(limit);
    ranked
}

/// Destination ports by packet count; portless packets are not counted
pub fn port_activity<'a, I>(records: I, limit: usize) -> Vec<(u16, u64)>
where
    I: IntoIterator<Item = &'a PacketRecord>,
{
    let mut counts: HashMap<u16, u64> = HashMap::new();
    for port in records.into_iter().filter_map(PacketRecord::dst_port) {
        *counts.entry(port).or_default() += 1;
    }
    let mut ranked: Vec<(u16, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}
