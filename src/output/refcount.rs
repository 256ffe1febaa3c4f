//! Nested enable counting for stream and power sequencing.

/// Where a get/put landed relative to the enabled range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// 0 -> 1: the caller must bring the resource up
    First,
    /// n -> n +/- 1 with the resource staying up
    Nested,
    /// 1 -> 0: the caller must tear the resource down
    Last,
}

/// Plain nested counter. Lives inside whatever lock serialises its users.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefCount(u32);

/// Put on a zero count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underflow;

impl RefCount {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn get(&mut self) -> Edge {
        self.0 += 1;
        if self.0 == 1 {
            Edge::First
        } else {
            Edge::Nested
        }
    }

    /// Drop one reference. A put at zero leaves the count untouched.
    pub fn put(&mut self) -> Result<Edge, Underflow> {
        match self.0 {
            0 => Err(Underflow),
            1 => {
                self.0 = 0;
                Ok(Edge::Last)
            }
            _ => {
                self.0 -= 1;
                Ok(Edge::Nested)
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.0
    }

    pub fn is_active(&self) -> bool {
        self.0 > 0
    }
}
