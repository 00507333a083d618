//! Closed-system water accounting. Every subsystem that removes water from
//! the grid routes the removal through exactly one of these channels, which
//! is what makes mass conservation checkable as a single sum.

use serde::{Deserialize, Serialize};

/// Scalar water reserves outside the grid. Units match the grid's water
/// units (1 unit = 100 mm of depth over one cell).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterPool {
    /// Free reserve: the aquifer wellsprings draw from. Edge runoff and
    /// rain recharge it.
    pub free: i64,
    /// Water evaporated into the sky; returns via rain.
    pub atmospheric: i64,
    /// Monotone counter of all water that has crossed a grid boundary.
    /// The water itself lands in `free`; this only records the flux.
    pub edge_runoff_total: i64,
}

impl WaterPool {
    pub fn new(free: i64, atmospheric: i64) -> Self {
        Self {
            free,
            atmospheric,
            edge_runoff_total: 0,
        }
    }

    /// Draw up to `amount` from the free reserve. Returns the amount
    /// actually drawn; wells dry up gracefully when the pool is short.
    pub fn draw(&mut self, amount: i64) -> i64 {
        let actual = amount.min(self.free).max(0);
        self.free -= actual;
        actual
    }

    /// Route evaporated water into the atmospheric reserve.
    pub fn deposit_atmospheric(&mut self, amount: i64) {
        debug_assert!(amount >= 0);
        self.atmospheric += amount;
    }

    /// Water that flowed past a grid boundary: recharge the free reserve
    /// and record the flux.
    pub fn deposit_edge_runoff(&mut self, amount: i64) {
        debug_assert!(amount >= 0);
        self.free += amount;
        self.edge_runoff_total += amount;
    }

    /// Condense up to `amount` out of the atmospheric reserve (the
    /// condenser structure's channel). Returns the amount taken.
    pub fn condense(&mut self, amount: i64) -> i64 {
        let actual = amount.min(self.atmospheric).max(0);
        self.atmospheric -= actual;
        actual
    }

    /// Move up to `amount` from the atmospheric reserve to the free
    /// reserve for a rain event. Returns the amount actually moved.
    pub fn rain(&mut self, amount: i64) -> i64 {
        let actual = amount.min(self.atmospheric).max(0);
        self.atmospheric -= actual;
        self.free += actual;
        actual
    }

    /// Total water held outside the grid.
    pub fn total(&self) -> i64 {
        self.free + self.atmospheric
    }
}
