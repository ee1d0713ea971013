use super::*;

fn small_3d() -> Structure {
  Structure {
    base_depth_end: 2,
    nodes_per_chunk: 8,
    ..Structure::default()
  }
}

// =========================================================================
// Validation
// =========================================================================

#[test]
fn test_default_is_valid() {
  Structure::default().validate().unwrap();
  assert_eq!(Structure::default().chunk_exponent(), Some(3));
}

#[test]
fn test_rejects_bad_dimensions() {
  let structure = Structure {
    dimensions: 4,
    ..Structure::default()
  };
  assert!(matches!(structure.validate(), Err(Error::Config(_))));
}

#[test]
fn test_rejects_chunk_size_not_power_of_factor() {
  // 16 is a power of 4 but not of 8
  let structure = Structure {
    nodes_per_chunk: 16,
    ..Structure::default()
  };
  assert!(structure.validate().is_err());

  let quad = Structure {
    dimensions: 2,
    nodes_per_chunk: 16,
    ..Structure::default()
  };
  quad.validate().unwrap();
  assert_eq!(quad.chunk_exponent(), Some(2));
}

#[test]
fn test_rejects_chunk_wider_than_first_cold_level() {
  let structure = Structure {
    base_depth_end: 2,
    nodes_per_chunk: 512,
    ..Structure::default()
  };
  assert!(structure.validate().is_err());
}

#[test]
fn test_rejects_inverted_tiers() {
  let structure = Structure {
    null_depth_end: 4,
    base_depth_end: 3,
    nodes_per_chunk: 8,
    ..Structure::default()
  };
  assert!(structure.validate().is_err());

  let cold = Structure {
    cold_depth_end: 6,
    ..Structure::default()
  };
  assert!(cold.validate().is_err());
}

#[test]
fn test_rejects_sparse_depth_inside_base() {
  let structure = Structure {
    chunk_policy: ChunkPolicy::Dynamic {
      sparse_depth_begin: 3,
    },
    ..Structure::default()
  };
  assert!(structure.validate().is_err());
}

#[test]
fn test_depth_end_defaults_to_ceiling() {
  assert_eq!(Structure::default().depth_end(), MAX_DEPTH);
  let bounded = Structure {
    cold_depth_end: 10,
    ..Structure::default()
  };
  assert_eq!(bounded.depth_end(), 10);
}

#[test]
fn test_ensure_same() {
  let a = Structure::default();
  let b = Structure {
    node_capacity: 1,
    ..Structure::default()
  };
  a.ensure_same(&a.clone()).unwrap();
  assert!(matches!(
    a.ensure_same(&b),
    Err(Error::Mismatch {
      what: "structure",
      ..
    })
  ));
}

#[test]
fn test_toml_partial_uses_defaults() {
  let structure: Structure = toml::from_str(
    r#"
    dimensions = 2
    nodes_per_chunk = 16

    [chunk_policy]
    kind = "dynamic"
    sparse_depth_begin = 8
    "#,
  )
  .unwrap();
  assert_eq!(structure.dimensions, 2);
  assert_eq!(structure.base_depth_end, 6);
  assert_eq!(
    structure.chunk_policy,
    ChunkPolicy::Dynamic {
      sparse_depth_begin: 8
    }
  );
}

// =========================================================================
// Chunk keys
// =========================================================================

#[test]
fn test_static_chunk_keys_align_to_level() {
  let layout = ChunkLayout::new(small_3d()).unwrap();
  // depth 2 spans ids 9..73, eight nodes per chunk
  assert_eq!(layout.level_begin(2), &Id::from(9));
  assert_eq!(layout.chunk_key(&Id::from(9), 2).id, Id::from(9));
  assert_eq!(layout.chunk_key(&Id::from(16), 2).id, Id::from(9));
  assert_eq!(layout.chunk_key(&Id::from(17), 2).id, Id::from(17));
  assert_eq!(layout.chunk_key(&Id::from(72), 2).id, Id::from(65));
}

#[test]
fn test_chunk_holds_descendants_of_one_node() {
  let layout = ChunkLayout::new(small_3d()).unwrap();
  let parent = Id::from(3);
  let key = layout.chunk_key(&parent.child(3, 0), 2);
  for dir in 0..8 {
    assert_eq!(layout.chunk_key(&parent.child(3, dir), 2), key);
  }
}

#[test]
fn test_dynamic_chunks_grow_past_sparse_depth() {
  let structure = Structure {
    chunk_policy: ChunkPolicy::Dynamic {
      sparse_depth_begin: 7,
    },
    ..Structure::default()
  };
  let layout = ChunkLayout::new(structure).unwrap();
  assert_eq!(layout.chunk_exponent(6), 3);
  assert_eq!(layout.chunk_exponent(7), 3);
  assert_eq!(layout.chunk_exponent(8), 4);
  assert_eq!(layout.chunk_exponent(10), 6);

  // At depth 8 one chunk covers 8^4 positions
  let begin = layout.level_begin(8).clone();
  let mut inside = begin.clone();
  inside.add_small(4095);
  let mut outside = begin.clone();
  outside.add_small(4096);
  assert_eq!(layout.chunk_key(&inside, 8).id, begin);
  assert_ne!(layout.chunk_key(&outside, 8).id, begin);
}

#[test]
fn test_chunk_key_ordering() {
  let shallow = ChunkKey::new(2, Id::from(60));
  let deep = ChunkKey::new(3, Id::from(73));
  assert!(shallow < deep);
  assert_eq!(deep.storage_key("-5"), "73-5");
  assert_eq!(deep.to_string(), "73@3");
}

#[test]
fn test_depth_of() {
  let layout = ChunkLayout::new(small_3d()).unwrap();
  assert_eq!(layout.depth_of(&Id::zero()), 0);
  assert_eq!(layout.depth_of(&Id::from(8)), 1);
  assert_eq!(layout.depth_of(&Id::from(9)), 2);
  assert_eq!(layout.depth_of(&Id::from(72)), 2);
  assert_eq!(layout.depth_of(&Id::from(73)), 3);
  let deep = layout.level_begin(30).clone();
  assert_eq!(layout.depth_of(&deep), 30);
}
