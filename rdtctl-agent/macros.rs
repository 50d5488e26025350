//! Declarative macros shared by the monitoring code

/// Define a metric enum with automatic `name()` and `all()` implementations
///
/// # Example
/// ```
/// use rdtctl::metric_enum;
///
/// metric_enum! {
///     pub enum CacheMetric {
///         Occupancy => "LLCOccupancy",
///         Bandwidth => "MemoryBandwidth",
///     }
/// }
///
/// assert_eq!(CacheMetric::Occupancy.name(), "LLCOccupancy");
/// assert_eq!(CacheMetric::all().len(), 2);
/// ```
#[macro_export]
macro_rules! metric_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $str:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}

/// Define an enum with `name()`, `all()` and one data accessor per variant
///
/// # Example
/// ```
/// use rdtctl::enum_with_data;
///
/// enum_with_data! {
///     pub enum Event: u8 {
///         Occupancy => ("LLCOccupancy", 0x01),
///         Total => ("TotalMemoryBandwidth", 0x02),
///     }
///     impl event_id -> u8
/// }
///
/// assert_eq!(Event::Total.name(), "TotalMemoryBandwidth");
/// assert_eq!(Event::Total.event_id(), 0x02);
/// ```
#[macro_export]
macro_rules! enum_with_data {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $data_type:ty {
            $($variant:ident => ($str:literal, $data:expr)),* $(,)?
        }
        impl $method:ident -> $return_type:ty
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn $method(&self) -> $return_type {
                match self {
                    $($name::$variant => $data,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}

/// Encode an exporter's registry into a text buffer
///
/// # Example
/// ```ignore
/// let mut buffer = Vec::new();
/// gather_metrics!(buffer, encoder, state.exporter, "RDT");
/// ```
#[macro_export]
macro_rules! gather_metrics {
    ($buffer:expr, $encoder:expr, $exporter:expr, $name:literal) => {
        if let Some(ref exporter) = $exporter {
            let metric_families = exporter.registry().gather();
            if let Err(e) = $encoder.encode(&metric_families, &mut $buffer) {
                tracing::error!(concat!("Failed to encode ", $name, " metrics: {}"), e);
            }
        }
    };
}
