use std::marker::PhantomData;

/// Monotonic id generator, parameterized over the id newtype it produces.
#[derive(Debug, Clone)]
pub struct IdGenerator<T: From<usize>> {
    next_id: usize,
    phantom: PhantomData<T>,
}

impl<T: From<usize>> IdGenerator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gen(&mut self) -> T {
        let id = self.next_id;
        self.next_id += 1;
        T::from(id)
    }
}

impl<T: From<usize>> Default for IdGenerator<T> {
    fn default() -> IdGenerator<T> {
        IdGenerator {
            next_id: 0,
            phantom: PhantomData,
        }
    }
}

/// Generates deterministic `prefix0`, `prefix1`, … names; used for alias
/// assignment in the assembly pass (spec §4.5 "All aliases are assigned
/// here").
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    prefix: String,
    id: IdGenerator<usize>,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        NameGenerator {
            prefix: prefix.into(),
            id: IdGenerator::new(),
        }
    }

    /// `name_1`, `name_2`, … — one-based, matching spec §6 ("tablename_N
    /// counters reset per compilation").
    pub fn gen(&mut self) -> String {
        format!("{}_{}", self.prefix, self.id.gen() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_generator_is_one_based_and_deterministic() {
        let mut g = NameGenerator::new("person");
        assert_eq!(g.gen(), "person_1");
        assert_eq!(g.gen(), "person_2");

        let mut g2 = NameGenerator::new("person");
        assert_eq!(g2.gen(), "person_1");
    }
}
