//! Plausible arguments for methods called without any.

use avalon_config::{ParamSpec, ParamType};
use rand::{distributions::Alphanumeric, rngs::ThreadRng, Rng};

use crate::data_model::Arg;

/// Produces an argument for a declared parameter.
pub trait FixtureGenerator {
    /// Argument for `param`
    fn generate(&mut self, param: &ParamSpec) -> Arg;

    /// One argument per parameter, in order
    fn generate_all(&mut self, params: &[ParamSpec]) -> Vec<Arg> {
        params.iter().map(|param| self.generate(param)).collect()
    }
}

/// Random values shaped after the declared type:
///
/// | type        | value                                   |
/// |-------------|-----------------------------------------|
/// | `bytes32`   | 32 hex digits                           |
/// | `bytes`, `string` | 10 to 50 ASCII letters            |
/// | `uint256`   | decimal in `1000..=1_000_000`           |
/// | `bytes32[]` | 2 to 5 comma-separated `bytes32` values |
/// | other       | empty string                            |
#[derive(Debug, Clone)]
pub struct RandomFixtures<R = ThreadRng> {
    rng: R,
}

impl RandomFixtures {
    /// Generator seeded from the thread-local RNG
    pub fn new() -> Self {
        Self::with_rng(rand::thread_rng())
    }
}

impl Default for RandomFixtures {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> RandomFixtures<R> {
    /// Generator drawing from `rng`
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    fn bytes32(&mut self) -> String {
        hex::encode(self.rng.gen::<[u8; 16]>())
    }

    fn letters(&mut self) -> String {
        let len = self.rng.gen_range(10..=50);
        let rng = &mut self.rng;
        std::iter::repeat_with(|| rng.sample(Alphanumeric))
            .map(char::from)
            .filter(char::is_ascii_alphabetic)
            .take(len)
            .collect()
    }
}

impl<R: Rng> FixtureGenerator for RandomFixtures<R> {
    fn generate(&mut self, param: &ParamSpec) -> Arg {
        let value = match &param.ty {
            ParamType::Bytes32 => self.bytes32(),
            ParamType::Bytes | ParamType::String => self.letters(),
            ParamType::Uint256 => self.rng.gen_range(1000..=1_000_000_u32).to_string(),
            ParamType::Bytes32Array => {
                let count = self.rng.gen_range(2..=5);
                (0..count)
                    .map(|_| self.bytes32())
                    .collect::<Vec<_>>()
                    .join(",")
            }
            ParamType::Other(_) => String::new(),
        };
        Arg::Text(value)
    }
}
