use mesh_migrate::algs::entity_codec::{ElementMessage, NodeMessage};
use mesh_migrate::algs::wire::{WireReader, WireWriter};
use mesh_migrate::mesh_error::MeshMigrateError;
use mesh_migrate::topology::components::NodeRecord;
use proptest::prelude::*;

fn node_record(dim: usize) -> impl Strategy<Value = NodeRecord> {
    (
        any::<u64>(),
        prop::collection::vec(-1.0e6f64..1.0e6, dim),
        any::<bool>(),
        prop::collection::vec(any::<u64>(), 0..8),
    )
        .prop_map(|(global_id, coordinates, is_ghost, element_refs)| NodeRecord {
            global_id,
            coordinates,
            is_ghost,
            element_refs,
        })
}

proptest! {
    #[test]
    fn element_payload_matches_declared_size(component in 0usize..16, nodes in prop::collection::vec(any::<u64>(), 1..9)) {
        let msg = ElementMessage { component, nodes };
        let row_size = msg.nodes.len();
        let mut buf = vec![0u8; ElementMessage::size_for(row_size)];
        let mut w = WireWriter::new(&mut buf);
        msg.pack(&mut w).unwrap();
        prop_assert_eq!(w.remaining(), 0);

        let mut r = WireReader::new(&buf);
        let back = ElementMessage::unpack(&mut r, |_| Ok(row_size)).unwrap();
        prop_assert_eq!(r.remaining(), 0);
        prop_assert_eq!(back, msg);
    }

    #[test]
    fn node_payload_matches_declared_size(
        (component, dim, node) in (0usize..16, 1usize..4)
            .prop_flat_map(|(c, dim)| (Just(c), Just(dim), node_record(dim)))
    ) {
        let msg = NodeMessage { component, node };
        prop_assert_eq!(msg.wire_size(), NodeMessage::size_for(dim, msg.node.element_refs.len()));

        let mut buf = vec![0u8; msg.wire_size()];
        msg.pack(&mut WireWriter::new(&mut buf)).unwrap();
        let mut r = WireReader::new(&buf);
        let back = NodeMessage::unpack(&mut r, |_| Ok(dim)).unwrap();
        prop_assert_eq!(r.remaining(), 0);
        prop_assert_eq!(back, msg);
    }

    #[test]
    fn any_truncation_is_an_error(nodes in prop::collection::vec(any::<u64>(), 1..6), cut in 1usize..8) {
        let row_size = nodes.len();
        let msg = ElementMessage { component: 0, nodes };
        let mut buf = vec![0u8; msg.wire_size()];
        msg.pack(&mut WireWriter::new(&mut buf)).unwrap();
        let short = &buf[..buf.len() - cut.min(buf.len())];
        let res = ElementMessage::unpack(&mut WireReader::new(short), |_| Ok(row_size));
        let is_underrun = matches!(res, Err(MeshMigrateError::WireUnderrun { .. }));
        prop_assert!(is_underrun);
    }
}

#[test]
fn packing_into_a_short_buffer_overruns() {
    let msg = ElementMessage {
        component: 1,
        nodes: vec![1, 2, 3],
    };
    let mut buf = vec![0u8; msg.wire_size() - 1];
    assert!(matches!(
        msg.pack(&mut WireWriter::new(&mut buf)),
        Err(MeshMigrateError::WireOverrun { .. })
    ));
}

#[test]
fn corrupt_reference_count_is_rejected_before_allocating() {
    // component 0, owned, gid 5, one coordinate, then an absurd ref count
    let mut buf = Vec::new();
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.push(0);
    buf.extend_from_slice(&5u64.to_le_bytes());
    buf.extend_from_slice(&1.5f64.to_le_bytes());
    buf.extend_from_slice(&u32::MAX.to_le_bytes());
    let err = NodeMessage::unpack(&mut WireReader::new(&buf), |_| Ok(1)).unwrap_err();
    assert!(matches!(err, MeshMigrateError::WireUnderrun { .. }));
}
