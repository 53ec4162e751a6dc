use poolheap_arena::{
    BumpGrower, GrowError, MoreCore, POOL_ALIGN, SystemPoolSource, acquire_pool,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn grower(capacity: usize) -> BumpGrower {
    let pool = acquire_pool(&mut SystemPoolSource::new(capacity), POOL_ALIGN).expect("pool");
    assert_eq!(pool.capacity(), capacity);
    BumpGrower::new(pool)
}

fn offset(g: &BumpGrower, ptr: std::ptr::NonNull<u8>) -> usize {
    ptr.as_ptr() as usize - g.base().as_ptr() as usize
}

#[test]
fn whole_pool_grant_then_exhaustion() {
    let mut g = grower(1_048_576);
    let region = g.grow(1_048_576).expect("whole pool fits");
    assert_eq!(offset(&g, region), 0);
    assert_eq!(g.used(), 1_048_576);

    assert_eq!(
        g.grow(1),
        Err(GrowError::Exhausted {
            requested: 1,
            remaining: 0
        })
    );
    assert_eq!(g.used(), 1_048_576);
}

#[test]
fn exhaustion_is_per_request_not_permanent() {
    let mut g = grower(1_000);

    let first = g.grow(400).expect("400 fits");
    assert_eq!(offset(&g, first), 0);
    assert_eq!(g.used(), 400);

    let second = g.grow(400).expect("800 fits");
    assert_eq!(offset(&g, second), 400);
    assert_eq!(g.used(), 800);

    assert!(matches!(g.grow(300), Err(GrowError::Exhausted { .. })));
    assert_eq!(g.used(), 800);

    let last = g.grow(200).expect("exact remainder fits");
    assert_eq!(offset(&g, last), 800);
    assert_eq!(g.used(), 1_000);
    assert_eq!(g.remaining(), 0);
}

#[test]
fn more_core_trait_matches_inherent_grow() {
    let mut g = grower(4_096);
    let brk = g.more_core(0).expect("zero growth");
    assert_eq!(offset(&g, brk), 0);
    let region = g.more_core(64).expect("grow");
    assert_eq!(offset(&g, region), 0);
    assert!(g.owns(region.as_ptr() as usize));
    assert!(matches!(
        g.more_core(-16),
        Err(GrowError::ShrinkUnsupported { requested: -16 })
    ));
    assert_eq!(g.used(), 64);
}

#[test]
fn random_grow_sequences_keep_used_bounded_and_ranges_disjoint() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const CAPACITY: usize = 64 * 1024;
    const STEPS: usize = 2_000;

    for seed in SEEDS {
        let mut g = grower(CAPACITY);
        let mut rng = XorShift64::new(seed);
        let mut granted: Vec<(usize, usize)> = Vec::new();
        let mut previous_used = 0;

        for step in 0..STEPS {
            let request = match rng.gen_range(0, 9) {
                0 => -(rng.gen_range(1, 512) as isize),
                1 => 0,
                2 => rng.gen_range(CAPACITY / 2, CAPACITY) as isize,
                _ => rng.gen_range(1, 256) as isize,
            };
            let before = g.used();
            match g.grow(request) {
                Ok(region) => {
                    let start = offset(&g, region);
                    assert_eq!(start, before, "seed={seed} step={step}: start is old used");
                    let len = request as usize;
                    if len > 0 {
                        for &(s, l) in &granted {
                            assert!(
                                start >= s + l || start + len <= s,
                                "seed={seed} step={step}: overlap with ({s}, {l})"
                            );
                        }
                        granted.push((start, len));
                    }
                    assert_eq!(g.used(), before + len);
                }
                Err(GrowError::Exhausted {
                    requested,
                    remaining,
                }) => {
                    assert_eq!(requested, request as usize);
                    assert_eq!(remaining, CAPACITY - before);
                    assert!(requested > remaining);
                    assert_eq!(g.used(), before, "seed={seed} step={step}: used moved");
                }
                Err(GrowError::ShrinkUnsupported { requested }) => {
                    assert!(requested < 0);
                    assert_eq!(g.used(), before);
                }
            }
            assert!(g.used() <= g.capacity(), "seed={seed} step={step}");
            assert!(g.used() >= previous_used, "seed={seed} step={step}");
            previous_used = g.used();
        }

        let total: usize = granted.iter().map(|&(_, l)| l).sum();
        assert_eq!(total, g.used(), "seed={seed}: grants account for used");
    }
}
