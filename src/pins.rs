//! SPI pin multiplexing between the dedicated IO_MUX routing and the GPIO matrix.
//!
//! Each SPI host has a set of native pads. A unit whose pins all match them uses
//! the SPI pad function directly; any other combination is routed through the
//! GPIO matrix. Only one unit's matrix routing can be active per pad, so the
//! previously selected unit is detached before the next one is attached.
//!
//! Chip select is never driven by the peripheral: the hardware CS toggles with
//! the wrong timing for the display protocol, so the pad stays a plain GPIO
//! output and the bus drives it explicitly.

use crate::gpio::{
    Direction, Gpio, PinFunction, Pull, MATRIX_DETACH_IN_LOW, MATRIX_DETACH_OUT,
};

/// The four signals of one SPI unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PinSet {
    /// MISO
    pub sdi: u8,
    /// MOSI
    pub sdo: u8,
    pub sck: u8,
    pub cs: u8,
}

impl PinSet {
    pub const fn new(sdi: u8, sdo: u8, sck: u8, cs: u8) -> Self {
        Self { sdi, sdo, sck, cs }
    }

    pub const fn as_array(&self) -> [u8; 4] {
        [self.sdi, self.sdo, self.sck, self.cs]
    }
}

/// Native pads and matrix signal indices of one SPI host.
#[derive(Clone, Copy, Debug)]
pub struct HostSignals {
    pub native: PinSet,
    pub clk_out: u16,
    pub d_out: u16,
    pub q_in: u16,
    pub cs0_out: u16,
}

/// Hosts 1 (SPI), 2 (HSPI) and 3 (VSPI).
const HOST_SIGNALS: [HostSignals; 3] = [
    HostSignals {
        native: PinSet::new(7, 8, 6, 11),
        clk_out: 0,
        d_out: 2,
        q_in: 1,
        cs0_out: 5,
    },
    HostSignals {
        native: PinSet::new(12, 13, 14, 15),
        clk_out: 71,
        d_out: 73,
        q_in: 72,
        cs0_out: 74,
    },
    HostSignals {
        native: PinSet::new(19, 23, 18, 5),
        clk_out: 63,
        d_out: 65,
        q_in: 64,
        cs0_out: 68,
    },
];

/// Signal table for `host`, `None` for host 0 and out-of-range hosts.
pub fn host_signals(host: u8) -> Option<&'static HostSignals> {
    match host {
        1..=3 => HOST_SIGNALS.get(host as usize - 1),
        _ => None,
    }
}

/// Default pins of `host`: its native pads.
pub fn default_pins(host: u8) -> Option<PinSet> {
    host_signals(host).map(|s| s.native)
}

/// Whether every pin of `pins` is one of `host`'s native pads.
pub fn is_native(host: u8, pins: &PinSet) -> bool {
    host_signals(host).is_some_and(|s| s.native == *pins)
}

/// Release a matrix-routed unit's pads and park them as idle GPIOs.
pub fn detach<G: Gpio>(gpio: &mut G, host: u8, pins: &PinSet) {
    let Some(sig) = host_signals(host) else { return };
    if sig.native == *pins {
        return;
    }

    gpio.route_input(MATRIX_DETACH_IN_LOW, sig.q_in, false);
    gpio.route_output(pins.sdo, MATRIX_DETACH_OUT, false, false);
    gpio.route_output(pins.sck, MATRIX_DETACH_OUT, false, false);
    gpio.route_output(pins.cs, MATRIX_DETACH_OUT, false, false);

    for pin in pins.as_array() {
        gpio.select_function(pin, PinFunction::Gpio);
    }

    park(gpio, pins);
    gpio.set_level(pins.cs, true);
}

/// Route `pins` to `host`. Returns the function used for the data/clock pads.
pub fn attach<G: Gpio>(gpio: &mut G, host: u8, pins: &PinSet) -> PinFunction {
    let Some(sig) = host_signals(host) else {
        return PinFunction::Gpio;
    };
    let function = if sig.native == *pins {
        PinFunction::Spi
    } else {
        PinFunction::Gpio
    };

    gpio.select_function(pins.sdi, function);
    gpio.select_function(pins.sdo, function);
    gpio.select_function(pins.sck, function);
    gpio.select_function(pins.cs, PinFunction::Gpio);
    gpio.set_output(pins.cs);

    if function == PinFunction::Gpio {
        park(gpio, pins);

        gpio.route_input(pins.sdi, sig.q_in, false);
        gpio.route_output(pins.sdo, sig.d_out, false, false);
        gpio.route_output(pins.sck, sig.clk_out, false, false);
        gpio.route_output(pins.cs, MATRIX_DETACH_OUT, false, false);
    } else {
        // a matrix unit detached earlier may have left MISO on constant low
        gpio.bypass_input(sig.q_in);
    }

    function
}

/// Move bus ownership from `prev` to `next`. A no-op when they are the same unit.
pub fn hand_off<G: Gpio>(
    gpio: &mut G,
    prev: Option<(u8, PinSet)>,
    next: (u8, PinSet),
) -> PinFunction {
    if let Some((host, pins)) = prev {
        if (host, pins) != next {
            log::trace!("spi{}: releasing pins {:?}", host, pins);
            detach(gpio, host, &pins);
        }
    }
    attach(gpio, next.0, &next.1)
}

fn park<G: Gpio>(gpio: &mut G, pins: &PinSet) {
    gpio.set_direction(pins.sdo, Direction::Output);
    gpio.set_direction(pins.sck, Direction::Output);
    gpio.set_direction(pins.cs, Direction::Output);
    gpio.set_direction(pins.sdi, Direction::Input);
    gpio.set_pull(pins.sdi, Pull::Up);
}
