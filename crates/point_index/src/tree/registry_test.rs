use super::*;
use crate::storage::MemoryEndpoint;
use crate::subset::Subset;
use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EXTENT: f64 = 64.0;

fn small_structure() -> Structure {
  Structure {
    base_depth_end: 2,
    nodes_per_chunk: 8,
    node_capacity: 4,
    ..Structure::default()
  }
}

fn options(structure: Structure, out: Arc<dyn Endpoint>) -> RegistryOptions {
  RegistryOptions {
    out,
    root: BBox::new(DVec3::ZERO, DVec3::splat(EXTENT)),
    structure,
    record_size: 0,
    base_postfix: String::new(),
    cold_postfix: String::new(),
    clip_threads: 2,
    usage: Arc::new(Usage::default()),
    threshold: 1.0,
    chunk_budget: 1024,
  }
}

fn registry(structure: Structure) -> Arc<Registry> {
  Arc::new(Registry::create(options(structure, Arc::new(MemoryEndpoint::new()))).unwrap())
}

fn random_points(seed: u64, n: usize) -> Vec<DVec3> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n)
    .map(|_| {
      DVec3::new(
        rng.random_range(0.0..EXTENT),
        rng.random_range(0.0..EXTENT),
        rng.random_range(0.0..EXTENT),
      )
    })
    .collect()
}

fn insert_all(registry: &Arc<Registry>, points: &[DVec3]) -> u64 {
  let mut climber = registry.climber();
  let mut clipper = registry.clipper(0);
  let mut inserted = 0;
  for (i, point) in points.iter().enumerate() {
    let point = PointRef::new(*point, i as u64, &[]);
    if registry.add_point(&mut climber, &mut clipper, point).unwrap() {
      inserted += 1;
    }
  }
  clipper.release().unwrap();
  inserted
}

// =========================================================================
// Insertion and lookup
// =========================================================================

#[test]
fn test_get_cell_finds_every_point() {
  let registry = registry(small_structure());
  let points = random_points(1, 600);
  assert_eq!(insert_all(&registry, &points), 600);
  assert_eq!(registry.point_count(), 600);

  let mut climber = registry.climber();
  let mut clipper = registry.clipper(1);
  for point in &points {
    climber.reset(*point);
    let cell = registry
      .get_cell(&mut climber, &mut clipper)
      .unwrap()
      .expect("leaf for inserted point");
    assert!(cell.contains(*point), "{point:?} missing from its leaf");
    assert!(climber.bbox().contains(*point));
  }
}

#[test]
fn test_get_cell_outside_data_is_none() {
  let registry = registry(small_structure());
  let mut climber = registry.climber();
  let mut clipper = registry.clipper(0);
  climber.reset(DVec3::splat(1.0));
  assert!(registry.get_cell(&mut climber, &mut clipper).unwrap().is_none());
}

#[test]
fn test_duplicates_are_dropped() {
  let registry = registry(small_structure());
  let point = DVec3::new(3.0, 4.0, 5.0);
  assert_eq!(insert_all(&registry, &[point; 10]), 1);
  assert_eq!(registry.point_count(), 1);
}

#[test]
fn test_stacked_points_exceed_depth() {
  let structure = Structure {
    discard_duplicates: false,
    cold_depth_end: 5,
    ..small_structure()
  };
  let registry = registry(structure);
  let mut climber = registry.climber();
  let mut clipper = registry.clipper(0);
  let point = PointRef::new(DVec3::splat(7.0), 0, &[]);
  let mut result = Ok(true);
  for _ in 0..32 {
    result = registry.add_point(&mut climber, &mut clipper, point);
    if result.is_err() {
      break;
    }
  }
  assert!(matches!(result, Err(Error::DepthExceeded { depth: 5 })));
}

#[test]
fn test_insertion_order_does_not_matter() {
  let points = random_points(2, 800);
  let mut reversed = points.clone();
  reversed.reverse();

  let forward = registry(small_structure());
  let backward = registry(small_structure());
  insert_all(&forward, &points);
  insert_all(&backward, &reversed);
  assert_eq!(forward.hierarchy(), backward.hierarchy());
}

#[test]
fn test_null_depths_hold_nothing() {
  let structure = Structure {
    null_depth_end: 1,
    ..small_structure()
  };
  let registry = registry(structure);
  insert_all(&registry, &random_points(3, 50));
  let hierarchy = registry.hierarchy();
  assert!(!hierarchy.contains(&Id::zero()));
  assert_eq!(hierarchy.point_count(), 50);
}

// =========================================================================
// Eviction
// =========================================================================

#[test]
fn test_mandatory_clip_evicts() {
  let registry = registry(small_structure());
  insert_all(&registry, &random_points(4, 300));
  registry.flush_clips().unwrap();

  let key = registry.layout().chunk_key(&Id::from(9), 2);
  registry.acquire(&key, 0).unwrap();
  registry.clip(&key, 0, false).unwrap();
  registry.flush_clips().unwrap();
  assert_eq!(registry.cold.refs(&key), 0);
  assert!(!registry.cold.idle_keys().contains(&key));
}

#[test]
fn test_sweep_releases_idle_chunks() {
  let registry = registry(small_structure());
  insert_all(&registry, &random_points(5, 300));
  assert!(registry.resident_chunks() > 0);
  registry.sweep();
  registry.flush_clips().unwrap();
  assert_eq!(registry.resident_chunks(), 0);
  assert_eq!(registry.point_count(), 300);
}

#[test]
fn test_concurrent_insertion_under_pressure() {
  let mut opts = options(small_structure(), Arc::new(MemoryEndpoint::new()));
  opts.chunk_budget = 1;
  opts.threshold = 0.0;
  let registry = Arc::new(Registry::create(opts).unwrap());
  let points = random_points(6, 2000);

  std::thread::scope(|scope| {
    for (worker, part) in points.chunks(500).enumerate() {
      let registry = Arc::clone(&registry);
      scope.spawn(move || {
        let mut climber = registry.climber();
        let mut clipper = registry.clipper(worker);
        for point in part {
          let point = PointRef::new(*point, worker as u64, &[]);
          assert!(registry.add_point(&mut climber, &mut clipper, point).unwrap());
        }
      });
    }
  });

  registry.flush_clips().unwrap();
  assert_eq!(registry.point_count(), 2000);

  let mut seen = 0;
  registry
    .visit_leaves(&mut |_, cell| {
      seen += cell.len();
      Ok(())
    })
    .unwrap();
  assert_eq!(seen, 2000);
}

// =========================================================================
// Persistence
// =========================================================================

#[test]
fn test_save_and_open() {
  let out: Arc<dyn Endpoint> = Arc::new(MemoryEndpoint::new());
  let mut opts = options(small_structure(), Arc::clone(&out));
  opts.base_postfix = "-1".into();
  let registry = Arc::new(Registry::create(opts.clone()).unwrap());
  let points = random_points(7, 400);
  insert_all(&registry, &points);
  registry.save().unwrap();
  assert!(out.exists("base-1").unwrap());
  assert_eq!(registry.resident_chunks(), 0);

  let hierarchy = registry.hierarchy();
  let reopened = Arc::new(Registry::open(opts, &hierarchy).unwrap());
  assert_eq!(reopened.hierarchy(), hierarchy);
  assert_eq!(reopened.ids(), registry.ids());

  // Continue inserting after reopening
  let more = random_points(8, 100);
  insert_all(&reopened, &more);
  assert_eq!(reopened.point_count(), 500);
}

#[test]
fn test_to_json_is_the_hierarchy() {
  let registry = registry(small_structure());
  insert_all(&registry, &random_points(9, 20));
  let json = registry.to_json().unwrap();
  let back: Hierarchy = serde_json::from_value(json).unwrap();
  assert_eq!(back, registry.hierarchy());
}

// =========================================================================
// Combination
// =========================================================================

fn subset_structure() -> Structure {
  Structure {
    null_depth_end: 1,
    ..small_structure()
  }
}

#[test]
fn test_subset_merge_equals_single_build() {
  let points = random_points(10, 1500);
  let out: Arc<dyn Endpoint> = Arc::new(MemoryEndpoint::new());
  let root = BBox::new(DVec3::ZERO, DVec3::splat(EXTENT));

  let whole = registry(subset_structure());
  insert_all(&whole, &points);

  let mut parts = Vec::new();
  for id in 0..8 {
    let subset = Subset::new(id, 8);
    subset.validate(&subset_structure()).unwrap();
    let mut opts = options(subset_structure(), Arc::clone(&out));
    opts.base_postfix = crate::builder::postfix(0, Some(subset.id));
    let part = Arc::new(Registry::create(opts).unwrap());
    let owned: Vec<DVec3> = points
      .iter()
      .copied()
      .filter(|p| subset.owns(&root, 3, *p))
      .collect();
    insert_all(&part, &owned);
    part.save().unwrap();
    parts.push(part);
  }

  let merged = &parts[0];
  for part in &parts[1..] {
    merged.merge(part).unwrap();
  }
  assert_eq!(merged.hierarchy(), whole.hierarchy());
}

#[test]
fn test_merge_rejects_overlap() {
  let a = registry(small_structure());
  let b = registry(small_structure());
  insert_all(&a, &random_points(11, 50));
  insert_all(&b, &random_points(12, 50));
  let before = a.hierarchy();
  assert!(matches!(a.merge(&b), Err(Error::Overlap(_))));
  assert_eq!(a.hierarchy(), before);
  assert!(matches!(a.merge(&a), Err(Error::Overlap(_))));
}

#[test]
fn test_merge_rejects_other_structure() {
  let a = registry(small_structure());
  let b = registry(Structure {
    node_capacity: 9,
    ..small_structure()
  });
  assert!(matches!(a.merge(&b), Err(Error::Mismatch { .. })));
}

#[test]
fn test_absorb_equals_single_build() {
  let points = random_points(13, 700);
  let whole = registry(small_structure());
  insert_all(&whole, &points);

  let first = registry(small_structure());
  let second = registry(small_structure());
  insert_all(&first, &points[..300]);
  insert_all(&second, &points[300..]);
  assert_eq!(first.absorb(&second).unwrap(), 400);
  assert_eq!(first.hierarchy(), whole.hierarchy());
}
