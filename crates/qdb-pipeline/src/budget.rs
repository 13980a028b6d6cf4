//! Shared resource budget.
//!
//! Admission leases a plan's estimated units from the budget; the lease gives
//! them back when dropped, which happens exactly once per admitted job no
//! matter how it ends.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug)]
struct Inner {
    capacity: u64,
    in_use: Mutex<u64>,
}

/// Pool of backend units shared by all running jobs.
#[derive(Debug, Clone)]
pub struct ResourceBudget {
    inner: Arc<Inner>,
}

impl ResourceBudget {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                in_use: Mutex::new(0),
            }),
        }
    }

    /// Lease `units` if they are available.
    pub fn try_acquire(&self, units: u64) -> Option<BudgetLease> {
        let mut in_use = self.inner.in_use.lock();
        let available = self.inner.capacity - *in_use;
        if units > available {
            return None;
        }
        *in_use += units;
        Some(BudgetLease {
            budget: Arc::clone(&self.inner),
            units,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.inner.capacity
    }

    pub fn in_use(&self) -> u64 {
        *self.inner.in_use.lock()
    }

    pub fn available(&self) -> u64 {
        self.inner.capacity - self.in_use()
    }
}

/// Units held by one admitted job. Released on drop.
#[derive(Debug)]
pub struct BudgetLease {
    budget: Arc<Inner>,
    units: u64,
}

impl BudgetLease {
    pub fn units(&self) -> u64 {
        self.units
    }
}

impl Drop for BudgetLease {
    fn drop(&mut self) {
        let mut in_use = self.budget.in_use.lock();
        *in_use = in_use.saturating_sub(self.units);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_and_release() {
        let budget = ResourceBudget::new(10);
        let a = budget.try_acquire(6).unwrap();
        assert_eq!(budget.available(), 4);
        assert!(budget.try_acquire(5).is_none());

        let b = budget.try_acquire(4).unwrap();
        assert_eq!(budget.available(), 0);
        assert_eq!(a.units() + b.units(), 10);

        drop(a);
        assert_eq!(budget.in_use(), 4);
        drop(b);
        assert_eq!(budget.available(), budget.capacity());
    }

    #[test]
    fn test_zero_unit_lease() {
        let budget = ResourceBudget::new(1);
        let _full = budget.try_acquire(1).unwrap();
        assert!(budget.try_acquire(0).is_some());
    }
}
