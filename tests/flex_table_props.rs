use mesh_migrate::data::flex_table::{FlexList, FlexTable};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Add(Vec<u32>),
    /// Remove the row at `idx % tentative_len`.
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u32>(), 0..4).prop_map(Op::Add),
        any::<usize>().prop_map(Op::Remove),
    ]
}

fn initial_rows() -> impl Strategy<Value = Vec<Vec<u32>>> {
    prop::collection::vec(prop::collection::vec(any::<u32>(), 0..4), 0..12)
}

/// Apply `ops`, returning each tentative index's row (`None` if removed).
fn stage(table: &mut FlexTable<u32>, ops: &[Op]) -> Vec<Option<Vec<u32>>> {
    for op in ops {
        match op {
            Op::Add(row) => {
                table.add_row(row.clone());
            }
            Op::Remove(i) => {
                let n = table.tentative_len();
                if n > 0 {
                    table.remove_row(i % n).unwrap();
                }
            }
        }
    }
    (0..table.tentative_len())
        .map(|i| {
            if table.is_removed(i).unwrap() {
                None
            } else {
                Some(table.get_row(i).unwrap().clone())
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn flush_preserves_every_surviving_row(rows in initial_rows(), ops in prop::collection::vec(op(), 0..30)) {
        let mut table = FlexTable::from_rows(rows);
        let live = table.len();
        let before = stage(&mut table, &ops);
        let pending = table.pending_len();
        let removed = table.removed_len();
        let remap = table.flush();

        prop_assert_eq!(table.len(), live + pending - removed);
        prop_assert_eq!(remap.len(), table.len());
        let mut seen = vec![false; before.len()];
        for new in 0..table.len() {
            let prior = remap.prior_index(new).unwrap();
            prop_assert!(!seen[prior], "prior index {} used twice", prior);
            seen[prior] = true;
            prop_assert_eq!(Some(table.get_row(new).unwrap()), before[prior].as_ref());
        }
        // every surviving row is reachable through the remap
        for (i, row) in before.iter().enumerate() {
            prop_assert_eq!(row.is_some(), seen[i]);
        }
        prop_assert!(!table.has_pending());
    }

    #[test]
    fn empty_flush_is_identity(rows in initial_rows(), ops in prop::collection::vec(op(), 0..20)) {
        let mut table = FlexTable::from_rows(rows);
        stage(&mut table, &ops);
        table.flush();
        let snapshot = table.as_slice().to_vec();
        let remap = table.flush();
        prop_assert!(remap.is_identity());
        prop_assert_eq!(remap.len(), snapshot.len());
        prop_assert_eq!(table.as_slice(), &snapshot[..]);
    }

    #[test]
    fn parallel_tables_flush_alike(rows in initial_rows(), ops in prop::collection::vec(op(), 0..30)) {
        // a scalar side table mirrors the row length of the main table
        let mut table = FlexTable::from_rows(rows.clone());
        let mut lens: FlexList<usize> = FlexList::from_rows(rows.iter().map(Vec::len).collect());
        for op in &ops {
            match op {
                Op::Add(row) => {
                    let a = table.add_row(row.clone());
                    let b = lens.add_row(row.len());
                    prop_assert_eq!(a, b);
                }
                Op::Remove(i) => {
                    let n = table.tentative_len();
                    if n > 0 {
                        table.remove_row(i % n).unwrap();
                        lens.remove_row(i % n).unwrap();
                    }
                }
            }
        }
        prop_assert_eq!(table.flush(), lens.flush());
        let got: Vec<usize> = table.iter().map(Vec::len).collect();
        prop_assert_eq!(got, lens.as_slice().to_vec());
    }
}

#[test]
fn shrink_with_swap_draws_from_the_tail() {
    let mut t = FlexTable::from_rows((0..5u32).map(|i| vec![i]).collect());
    t.remove_row(1).unwrap();
    t.remove_row(3).unwrap();
    t.add_row(vec![99]);
    let remap = t.flush();
    assert_eq!(t.len(), 4);
    assert_eq!(remap.as_slice(), &[0, 5, 2, 4]);
    assert_eq!(t.as_slice(), &[vec![0u32], vec![99], vec![2], vec![4]]);
}

#[test]
fn pure_growth_appends_in_submission_order() {
    let mut t = FlexTable::from_rows((0..3u32).map(|i| vec![i]).collect());
    assert_eq!(t.add_row(vec![10, 11]), 3);
    assert_eq!(t.add_row(vec![12]), 4);
    let remap = t.flush();
    assert_eq!(remap.as_slice(), &[0, 1, 2, 3, 4]);
    assert_eq!(t.get_row(3).unwrap(), &vec![10, 11]);
    assert_eq!(t.get_row(4).unwrap(), &vec![12]);
}
