use rand::Rng;

/// Generation hyperparameters. Kept in one place so callers (and tests) can
/// override them instead of relying on values baked into the decode loop.
#[derive(Debug, Clone)]
pub struct SamplingOptions {
    /// Upper bound on newly generated tokens per request.
    pub max_new_tokens: usize,
    /// Softmax temperature. Values <= 0 force greedy decoding.
    pub temperature: f64,
    /// Nucleus threshold; 1.0 disables the nucleus filter.
    pub top_p: f64,
    /// When false the sampler always takes the argmax.
    pub do_sample: bool,
    /// Prompt truncation length in tokens.
    pub max_input_tokens: usize,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            do_sample: true,
            max_input_tokens: 1024,
        }
    }
}

/// Pick the next token id from raw last-position logits.
pub fn sample_token(logits: &[f32], opts: &SamplingOptions, rng: &mut impl Rng) -> usize {
    if !opts.do_sample || opts.temperature <= 0.0 {
        return argmax(logits);
    }
    let probs = softmax_with_temperature(logits, opts.temperature as f32);
    if opts.top_p < 1.0 {
        nucleus_sample(&probs, opts.top_p as f32, rng)
    } else {
        multinomial_sample(&probs, rng)
    }
}

fn argmax(logits: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (i, &score) in logits.iter().enumerate() {
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    best
}

fn softmax_with_temperature(logits: &[f32], temperature: f32) -> Vec<f32> {
    let scaled: Vec<f32> = logits.iter().map(|&l| l / temperature).collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scaled.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn multinomial_sample(probs: &[f32], rng: &mut impl Rng) -> usize {
    let draw: f32 = rng.gen_range(0.0..1.0);
    let mut cumsum = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumsum += p;
        if cumsum > draw {
            return i;
        }
    }
    probs.len() - 1
}

/// Nucleus sampling: keep the smallest set of tokens whose cumulative
/// probability exceeds `p`, renormalize, and draw from it.
fn nucleus_sample(probs: &[f32], p: f32, rng: &mut impl Rng) -> usize {
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumsum = 0.0;
    let mut nucleus = Vec::new();
    for (i, prob) in indexed {
        cumsum += prob;
        nucleus.push((i, prob));
        if cumsum > p {
            break;
        }
    }

    let sum: f32 = nucleus.iter().map(|(_, prob)| prob).sum();
    let draw: f32 = rng.gen_range(0.0..1.0);
    let mut cumsum = 0.0;
    for (i, prob) in &nucleus {
        cumsum += prob / sum;
        if cumsum > draw {
            return *i;
        }
    }
    nucleus.last().map(|(i, _)| *i).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn opts(do_sample: bool, temperature: f64, top_p: f64) -> SamplingOptions {
        SamplingOptions {
            do_sample,
            temperature,
            top_p,
            ..SamplingOptions::default()
        }
    }

    #[test]
    fn disabled_sampling_is_greedy() {
        let logits = [0.1, 3.0, -2.0, 1.5];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            assert_eq!(sample_token(&logits, &opts(false, 0.7, 0.9), &mut rng), 1);
        }
    }

    #[test]
    fn zero_temperature_is_greedy() {
        let logits = [0.0, 0.5, 9.0];
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(sample_token(&logits, &opts(true, 0.0, 0.9), &mut rng), 2);
    }

    #[test]
    fn tight_nucleus_stays_on_dominant_token() {
        // One token holds almost all probability mass; with top_p 0.5 the
        // nucleus contains only it, whatever the rng draws.
        let logits = [10.0, 0.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            assert_eq!(sample_token(&logits, &opts(true, 0.7, 0.5), &mut rng), 0);
        }
    }

    #[test]
    fn sampling_always_returns_valid_index() {
        let logits = [1.0f32; 16];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let token = sample_token(&logits, &opts(true, 1.0, 1.0), &mut rng);
            assert!(token < logits.len());
        }
    }

    #[test]
    fn identical_seeds_give_identical_draws() {
        let logits = [0.3, 1.2, 0.9, 2.1, 0.0];
        let options = opts(true, 0.7, 0.9);
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        let first: Vec<usize> = (0..32).map(|_| sample_token(&logits, &options, &mut a)).collect();
        let second: Vec<usize> = (0..32).map(|_| sample_token(&logits, &options, &mut b)).collect();
        assert_eq!(first, second);
    }
}
