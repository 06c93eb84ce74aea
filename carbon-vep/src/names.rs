//! Container and packet name tables for diagnostics.
//!
//! Applications register names for their container and packet types once
//! at startup; dumps and traces then render `SYSTEM/VERSION` instead of
//! raw numbers. The framework's own SYSTEM names are seeded on first use.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::container::{ContainerType, CONTAINER_SYSTEM};

struct ContainerNames {
    name: &'static str,
    packets: HashMap<u32, &'static str>,
}

static TABLE: Mutex<Option<HashMap<ContainerType, ContainerNames>>> = Mutex::new(None);

const SYSTEM_PACKET_NAMES: [&str; 8] = [
    "NONE",
    "RESULT",
    "VERSION",
    "VERSION_REPLY",
    "MEMORY_STAT",
    "MEMORY_STAT_REPLY",
    "NETCONN_STAT",
    "NETCONN_STAT_REPLY",
];

fn with_table<R>(f: impl FnOnce(&mut HashMap<ContainerType, ContainerNames>) -> R) -> R {
    let mut guard = TABLE.lock();
    let table = guard.get_or_insert_with(|| {
        let mut table = HashMap::new();
        let mut packets = HashMap::new();
        for (index, name) in SYSTEM_PACKET_NAMES.iter().enumerate() {
            packets.insert(index as u32, *name);
        }
        table.insert(CONTAINER_SYSTEM, ContainerNames { name: "SYSTEM", packets });
        table
    });
    f(table)
}

/// Register (or rename) a container type.
pub fn register_container(ctype: ContainerType, name: &'static str) {
    with_table(|table| {
        table
            .entry(ctype)
            .or_insert_with(|| ContainerNames { name, packets: HashMap::new() })
            .name = name;
    });
}

/// Register packet names for a container type, numbering from `first`.
pub fn register_packets(ctype: ContainerType, first: u32, names: &[&'static str]) {
    with_table(|table| {
        let entry = table
            .entry(ctype)
            .or_insert_with(|| ContainerNames { name: "?", packets: HashMap::new() });
        for (offset, name) in names.iter().enumerate() {
            entry.packets.insert(first + offset as u32, *name);
        }
    });
}

/// Name of a container type, `"container(N)"` when unregistered.
#[must_use]
pub fn container_name(ctype: ContainerType) -> String {
    with_table(|table| {
        table.get(&ctype).map_or_else(|| format!("container({ctype})"), |c| c.name.to_string())
    })
}

/// Name of a packet type within a container type, `"packet(N)"` when
/// unregistered.
#[must_use]
pub fn packet_name(ctype: ContainerType, ptype: u32) -> String {
    with_table(|table| {
        table
            .get(&ctype)
            .and_then(|c| c.packets.get(&ptype))
            .map_or_else(|| format!("packet({ptype})"), |name| (*name).to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_names_preseeded() {
        assert_eq!(container_name(CONTAINER_SYSTEM), "SYSTEM");
        assert_eq!(packet_name(CONTAINER_SYSTEM, 2), "VERSION");
        assert_eq!(packet_name(CONTAINER_SYSTEM, 3), "VERSION_REPLY");
    }

    #[test]
    fn test_unregistered_fall_back_to_numbers() {
        assert_eq!(container_name(0x7F00), "container(32512)");
        assert_eq!(packet_name(0x7F00, 9), "packet(9)");
    }

    #[test]
    fn test_register_application_names() {
        register_container(0x0042, "HOSTCTL");
        register_packets(0x0042, 1, &["PING", "PING_REPLY"]);

        assert_eq!(container_name(0x0042), "HOSTCTL");
        assert_eq!(packet_name(0x0042, 1), "PING");
        assert_eq!(packet_name(0x0042, 2), "PING_REPLY");
        assert_eq!(packet_name(0x0042, 3), "packet(3)");
    }
}
