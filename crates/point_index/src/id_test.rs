use super::*;

#[test]
fn test_level_begin_matches_geometric_series() {
  // (f^d - 1) / (f - 1) for f = 8
  assert_eq!(level_begin(0, 3), Id::from(0));
  assert_eq!(level_begin(1, 3), Id::from(1));
  assert_eq!(level_begin(2, 3), Id::from(9));
  assert_eq!(level_begin(3, 3), Id::from(73));
  // f = 4
  assert_eq!(level_begin(3, 2), Id::from(21));
}

#[test]
fn test_child_and_parent() {
  let root = Id::zero();
  for dir in 0..8 {
    let child = root.child(3, dir);
    assert_eq!(child, Id::from(1 + dir));
    assert_eq!(child.parent(3), Some(Id::zero()));
    assert_eq!(child.direction(3), Some(dir));
  }
  let deep = Id::from(5).child(2, 3);
  assert_eq!(deep, Id::from(24));
  assert_eq!(deep.parent(2), Some(Id::from(5)));
  assert_eq!(Id::zero().parent(3), None);
}

#[test]
fn test_shift_across_limb_boundary() {
  let one = Id::from(1);
  let big = one.shl(64);
  assert_eq!(big.bits(), 65);
  assert_eq!(big.to_u64(), None);
  assert_eq!(big.shr(64), one);
  assert_eq!(big.shr(65), Id::zero());

  let value = Id::from(0xdead_beef);
  assert_eq!(value.shl(100).shr(100), value);
  assert_eq!(value.shl(3).low_u64(), 0xdead_beef << 3);
}

#[test]
fn test_add_carries_into_new_limb() {
  let max = Id::from(u64::MAX);
  let sum = max.add(&Id::from(1));
  assert_eq!(sum, Id::from(1).shl(64));

  let mut inc = Id::from(u64::MAX);
  inc.add_small(2);
  assert_eq!(inc, Id::from(1).shl(64).add(&Id::from(1)));
}

#[test]
fn test_checked_sub() {
  let big = Id::from(1).shl(64);
  assert_eq!(big.checked_sub(&Id::from(1)), Some(Id::from(u64::MAX)));
  assert_eq!(Id::from(3).checked_sub(&Id::from(4)), None);
  assert_eq!(Id::from(4).checked_sub(&Id::from(4)), Some(Id::zero()));
}

#[test]
fn test_ordering_uses_width_first() {
  let small = Id::from(u64::MAX);
  let big = Id::from(1).shl(64);
  assert!(small < big);
  assert!(Id::from(2) < Id::from(3));
  assert!(Id::zero() < Id::from(1));

  let mut ids = vec![big.clone(), Id::from(7), Id::zero(), small.clone()];
  ids.sort();
  assert_eq!(ids, vec![Id::zero(), Id::from(7), small, big]);
}

#[test]
fn test_decimal_display_and_parse() {
  assert_eq!(Id::zero().to_string(), "0");
  assert_eq!(Id::from(42).to_string(), "42");

  let two_64 = Id::from(1).shl(64);
  assert_eq!(two_64.to_string(), "18446744073709551616");
  assert_eq!("18446744073709551616".parse::<Id>().unwrap(), two_64);

  let two_128 = Id::from(1).shl(128);
  let text = "340282366920938463463374607431768211456";
  assert_eq!(two_128.to_string(), text);
  assert_eq!(text.parse::<Id>().unwrap(), two_128);

  // A chunk boundary with an interior zero-padded group
  let padded = "10000000000000000000000000000000000001";
  assert_eq!(padded.parse::<Id>().unwrap().to_string(), padded);
}

#[test]
fn test_parse_rejects_garbage() {
  assert!("".parse::<Id>().is_err());
  assert!("-1".parse::<Id>().is_err());
  assert!("12a".parse::<Id>().is_err());
}

#[test]
fn test_serde_as_string_and_map_key() {
  let id = Id::from(1).shl(70);
  let json = serde_json::to_string(&id).unwrap();
  assert_eq!(json, format!("\"{id}\""));
  let back: Id = serde_json::from_str(&json).unwrap();
  assert_eq!(back, id);

  let mut map = std::collections::BTreeMap::new();
  map.insert(id.clone(), 3u64);
  let encoded = serde_json::to_string(&map).unwrap();
  let decoded: std::collections::BTreeMap<Id, u64> = serde_json::from_str(&encoded).unwrap();
  assert_eq!(decoded.get(&id), Some(&3));
}

#[test]
fn test_deep_level_begin_is_wide() {
  let begin = level_begin(30, 3);
  assert!(begin.bits() > 64);
  let next = level_begin(31, 3);
  let mut expected = begin.shl(3);
  expected.add_small(1);
  assert_eq!(next, expected);
}
