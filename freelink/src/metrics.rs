// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of freelink.
//
// freelink is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// freelink is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with freelink.  If not,
// see <http://www.gnu.org/licenses/>.

//! # freelink metrics
//!
//! # Introduction
//!
//! freelink uses [OpenTelemetry] to collect metrics. The OTel advice is to "Re-use Instruments:
//! Instruments are designed for reuse. Avoid creating new instruments repeatedly." Fine, but where
//! to keep them? I'd prefer not to litter [Freelink] with a field of type `Counter<u64>` per
//! metric, so this module keeps them in a map from metric name to instrument.
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//! [Freelink]: crate::freelink::Freelink
//!
//! # Usage
//!
//! David Tolnay's [inventory] crate removes the need for a centralized list of metric names.
//! Register a metric next to the code that collects it:
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("subscriptions.created", Sort::IntegralCounter) }
//! // ...
//! counter_add!(state.instruments, "subscriptions.created", 1, &[]);
//! ```
//!
//! [Instruments::new] pre-builds every registered instrument & panics on duplicate names.
//! `counter_add!` panics on a name that wasn't registered as a counter. These are logic errors that
//! a richer type system would catch at compile-time; the unit test below at least catches them at
//! test time.
//!
//! Nothing here installs an exporter: unless the embedding process sets a global meter provider,
//! the instruments are no-ops.

use std::collections::{HashMap, hash_map::Entry};

use opentelemetry::{KeyValue, global, metrics::Counter};

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to `Counter<u64>`
    IntegralCounter,
}

/// The type of thing being inventoried
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

enum Instrument {
    CounterU64(Counter<u64>),
}

/// Container for OTel instruments
pub struct Instruments {
    map: HashMap<&'static str, Instrument>,
}

impl std::fmt::Debug for Instruments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruments")
            .field("names", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Instruments {
    pub fn new(prefix: &'static str) -> Instruments {
        let meter = global::meter(prefix);
        let mut map = HashMap::new();
        IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
            match map.entry(reg.name()) {
                Entry::Occupied(_) => panic!("The metric name {} was used twice", reg.name()),
                Entry::Vacant(vacant) => {
                    vacant.insert(match reg.sort() {
                        Sort::IntegralCounter => {
                            Instrument::CounterU64(meter.u64_counter(reg.name()).build())
                        }
                    });
                }
            }
        });
        Instruments { map }
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        match self.map.get(name) {
            Some(Instrument::CounterU64(c)) => c.add(count, attributes),
            None => panic!("{} does not name a counter", name),
        }
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr, $attrs:expr) => {
        $instr.add($name, $count, $attrs);
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registrations() {
        // Panics on a duplicate
        let instruments = Instruments::new("freelink-test");
        for name in [
            "subscriptions.created",
            "subscriptions.removed",
            "subscriptions.rejected",
            "selectors.cache.hits",
            "selectors.cache.misses",
            "selectors.cache.errors",
            "users.registrations",
            "users.otp.issued",
            "users.otp.verified",
            "users.otp.failures",
            "portfolio.views",
        ] {
            counter_add!(instruments, name, 1, &[]);
        }
    }
}
