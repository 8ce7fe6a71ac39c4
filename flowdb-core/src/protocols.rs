//! Symbolic protocol name tables
//!
//! Conditional operands may name protocols symbolically (`proto = tcp`,
//! `l7proto = dns`) instead of numerically. All keys are lower case; the
//! input sanitizer folds user input to lower case before tokenizing.

/// IANA IP protocol numbers, keyed by lower-case name
static IP_PROTOCOLS: &[(&str, u8)] = &[
    ("hopopt", 0),
    ("icmp", 1),
    ("igmp", 2),
    ("ggp", 3),
    ("ipv4", 4),
    ("st", 5),
    ("tcp", 6),
    ("cbt", 7),
    ("egp", 8),
    ("igp", 9),
    ("pup", 12),
    ("udp", 17),
    ("mux", 18),
    ("hmp", 20),
    ("rdp", 27),
    ("irtp", 28),
    ("dccp", 33),
    ("idpr", 35),
    ("xtp", 36),
    ("ddp", 37),
    ("il", 40),
    ("ipv6", 41),
    ("sdrp", 42),
    ("ipv6-route", 43),
    ("ipv6-frag", 44),
    ("idrp", 45),
    ("rsvp", 46),
    ("gre", 47),
    ("dsr", 48),
    ("esp", 50),
    ("ah", 51),
    ("narp", 54),
    ("mobile", 55),
    ("skip", 57),
    ("ipv6-icmp", 58),
    ("ipv6-nonxt", 59),
    ("ipv6-opts", 60),
    ("rvd", 66),
    ("sat-mon", 69),
    ("visa", 70),
    ("wsn", 74),
    ("br-sat-mon", 76),
    ("wb-mon", 78),
    ("iso-ip", 80),
    ("vmtp", 81),
    ("secure-vmtp", 82),
    ("vines", 83),
    ("ttp", 84),
    ("eigrp", 88),
    ("ospfigp", 89),
    ("mtp", 92),
    ("ax.25", 93),
    ("ipip", 94),
    ("etherip", 97),
    ("encap", 98),
    ("gmtp", 100),
    ("ifmp", 101),
    ("pnni", 102),
    ("pim", 103),
    ("aris", 104),
    ("scps", 105),
    ("qnx", 106),
    ("a/n", 107),
    ("ipcomp", 108),
    ("snp", 109),
    ("compaq-peer", 110),
    ("ipx-in-ip", 111),
    ("vrrp", 112),
    ("pgm", 113),
    ("l2tp", 115),
    ("ddx", 116),
    ("iatp", 117),
    ("stp", 118),
    ("srp", 119),
    ("uti", 120),
    ("smp", 121),
    ("sm", 122),
    ("ptp", 123),
    ("fire", 125),
    ("crtp", 126),
    ("crudp", 127),
    ("sscopmce", 128),
    ("iplt", 129),
    ("sps", 130),
    ("pipe", 131),
    ("sctp", 132),
    ("fc", 133),
    ("manet", 138),
    ("hip", 139),
    ("shim6", 140),
    ("wesp", 141),
    ("rohc", 142),
];

/// Layer-7 protocol ids as assigned by the DPI engine, keyed by lower-case name
static L7_PROTOCOLS: &[(&str, u16)] = &[
    ("unknown", 0),
    ("ftp", 1),
    ("pop3", 2),
    ("smtp", 3),
    ("imap", 4),
    ("dns", 5),
    ("ipp", 6),
    ("http", 7),
    ("mdns", 8),
    ("ntp", 9),
    ("netbios", 10),
    ("nfs", 11),
    ("ssdp", 12),
    ("bgp", 13),
    ("snmp", 14),
    ("xdmcp", 15),
    ("smb", 16),
    ("syslog", 17),
    ("dhcp", 18),
    ("postgres", 19),
    ("mysql", 20),
    ("tds", 21),
    ("pop3s", 23),
    ("tftp", 33),
    ("rtp", 39),
    ("rdp", 40),
    ("ssl", 64),
    ("ssh", 65),
    ("telnet", 70),
    ("sip", 87),
    ("dhcpv6", 103),
    ("kerberos", 111),
    ("ldap", 112),
    ("xmpp", 134),
    ("radius", 146),
    ("openvpn", 159),
    ("ciscovpn", 160),
];

/// Look up an IP protocol number by its symbolic lower-case name
pub fn ip_proto_id(name: &str) -> Option<u8> {
    IP_PROTOCOLS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
}

/// Name of an IP protocol number, or its decimal form if unassigned
pub fn ip_proto_name(id: u8) -> String {
    IP_PROTOCOLS
        .iter()
        .find(|(_, i)| *i == id)
        .map(|(n, _)| n.to_string())
        .unwrap_or_else(|| id.to_string())
}

/// Look up a layer-7 protocol id by its symbolic lower-case name
pub fn l7_proto_id(name: &str) -> Option<u16> {
    L7_PROTOCOLS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
}

/// Name of a layer-7 protocol id, or its decimal form if unassigned
pub fn l7_proto_name(id: u16) -> String {
    L7_PROTOCOLS
        .iter()
        .find(|(_, i)| *i == id)
        .map(|(n, _)| n.to_string())
        .unwrap_or_else(|| id.to_string())
}
