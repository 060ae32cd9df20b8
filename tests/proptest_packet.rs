use proptest::prelude::*;

use dhcpkv::{DhcpPacket, MessageType, OptionCode};

const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const DHCP_FIXED_HEADER_SIZE: usize = 240;

fn valid_header() -> Vec<u8> {
    let mut packet = vec![0u8; DHCP_FIXED_HEADER_SIZE];
    packet[0] = 1;
    packet[1] = 1;
    packet[2] = 6;
    packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
    packet
}

fn option_code() -> impl Strategy<Value = u8> {
    (1u8..=254).prop_filter("overload and message type are special", |code| {
        *code != OptionCode::OptionOverload as u8 && *code != OptionCode::MessageType as u8
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(5000))]

    #[test]
    fn parse_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let _ = DhcpPacket::parse(&data);
    }

    #[test]
    fn parse_never_panics_on_valid_header_with_random_options(
        options_data in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut packet = valid_header();
        packet.extend_from_slice(&options_data);
        let _ = DhcpPacket::parse(&packet);
    }

    #[test]
    fn parse_never_panics_on_overloaded_fields(
        overload_flag in any::<u8>(),
        sname_data in prop::collection::vec(any::<u8>(), 64..=64),
        file_data in prop::collection::vec(any::<u8>(), 128..=128)
    ) {
        let mut packet = valid_header();
        packet[44..108].copy_from_slice(&sname_data);
        packet[108..236].copy_from_slice(&file_data);
        packet.extend_from_slice(&[52, 1, overload_flag, 255]);
        let _ = DhcpPacket::parse(&packet);
    }

    #[test]
    fn repeated_options_are_concatenated(
        code in option_code(),
        first in prop::collection::vec(any::<u8>(), 0..=255),
        second in prop::collection::vec(any::<u8>(), 0..=255),
    ) {
        let mut packet = valid_header();
        for part in [&first, &second] {
            packet.push(code);
            packet.push(part.len() as u8);
            packet.extend_from_slice(part);
        }
        packet.push(255);

        let parsed = DhcpPacket::parse(&packet).unwrap();
        let joined: Vec<u8> = first.iter().chain(second.iter()).copied().collect();
        prop_assert_eq!(parsed.options.get(code), Some(joined.as_slice()));
    }

    #[test]
    fn long_options_survive_encoding(
        code in option_code(),
        value in prop::collection::vec(any::<u8>(), 1..1024),
        xid in any::<u32>(),
    ) {
        let mut packet = DhcpPacket::request(MessageType::Discover, [2, 0, 0, 0, 0, 1], xid);
        packet.options.insert(code, value.clone());

        let encoded = packet.encode();
        prop_assert!(encoded.len() >= 300);

        let reparsed = DhcpPacket::parse(&encoded).unwrap();
        prop_assert_eq!(reparsed.xid, xid);
        prop_assert_eq!(reparsed.options.get(code), Some(value.as_slice()));
    }

    #[test]
    fn message_type_always_encoded_first(
        codes in prop::collection::btree_set(option_code(), 0..20),
    ) {
        let mut packet = DhcpPacket::request(MessageType::Request, [2, 0, 0, 0, 0, 1], 1);
        for code in codes {
            packet.options.insert(code, [code]);
        }

        let encoded = packet.encode();
        prop_assert_eq!(
            &encoded[DHCP_FIXED_HEADER_SIZE..DHCP_FIXED_HEADER_SIZE + 3],
            &[OptionCode::MessageType as u8, 1, MessageType::Request as u8]
        );
    }

    #[test]
    fn short_packets_always_rejected(
        data in prop::collection::vec(any::<u8>(), 0..240)
    ) {
        prop_assert!(DhcpPacket::parse(&data).is_err());
    }

    #[test]
    fn bad_magic_cookie_always_rejected(
        cookie in any::<[u8; 4]>()
    ) {
        prop_assume!(cookie != DHCP_MAGIC_COOKIE);

        let mut packet = valid_header();
        packet[236..240].copy_from_slice(&cookie);
        packet.push(255);

        prop_assert!(DhcpPacket::parse(&packet).is_err());
    }

    #[test]
    fn excessive_hops_always_rejected(
        hops in 17u8..=255
    ) {
        let mut packet = valid_header();
        packet[3] = hops;
        packet.push(255);

        prop_assert!(DhcpPacket::parse(&packet).is_err());
    }

    #[test]
    fn format_mac_never_exceeds_chaddr(
        hlen in any::<u8>(),
        chaddr in any::<[u8; 16]>(),
    ) {
        let mut packet = DhcpPacket::request(MessageType::Discover, [0; 6], 0);
        packet.hlen = hlen;
        packet.chaddr = chaddr;

        let mac = packet.format_mac();
        let octets = (hlen as usize).min(16);
        prop_assert_eq!(mac.len(), (octets * 3).saturating_sub(1));
    }
}
