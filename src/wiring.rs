// Board-specific wiring of the TFT module.
// Profiles are selected via Cargo features; the default profile is a bare
// ILI9341 breakout with an XPT2046 touch controller on VSPI.
//! The following wiring is assumed (default profile):
//! - TFT MISO => GPIO19, shared with touch DOUT
//! - TFT MOSI => GPIO23, shared with touch DIN
//! - TFT SCK  => GPIO18, shared with touch CLK
//! - TFT CS   => GPIO5
//! - TFT DC   => GPIO26
//! - TFT RST  => GPIO27
//! - TFT LED  => GPIO32 through a PNP transistor (low = on)
//! - T_CS     => GPIO4
//! - GND => GND
//! - 3.3V => VCC

use cfg_if::cfg_if;

use crate::bus::unit;
use crate::display::TftPins;

/// Host the display sits on (VSPI).
pub const TFT_HOST: u8 = 3;

cfg_if! {
    if #[cfg(feature = "board-wrover-kit")] {
        // ESP-WROVER-KIT on-board LCD, no touch. Pins go through the matrix.
        pub const TFT_PINS: TftPins = TftPins {
            disp_unit: unit(TFT_HOST, 0),
            touch_unit: unit(TFT_HOST, 1),
            miso: 25,
            mosi: 23,
            clk: 19,
            cs: 22,
            tcs: 0,
            dc: 21,
            rst: Some(18),
            backlight: Some(5),
        };
    } else if #[cfg(feature = "board-vspi-native")] {
        // Everything on the VSPI native pads, soft reset, backlight hard-wired
        pub const TFT_PINS: TftPins = TftPins {
            disp_unit: unit(TFT_HOST, 0),
            touch_unit: unit(TFT_HOST, 1),
            miso: 19,
            mosi: 23,
            clk: 18,
            cs: 5,
            tcs: 4,
            dc: 21,
            rst: None,
            backlight: None,
        };
    } else {
        // Default profile
        pub const TFT_PINS: TftPins = TftPins {
            disp_unit: unit(TFT_HOST, 0),
            touch_unit: unit(TFT_HOST, 1),
            miso: 19,
            mosi: 23,
            clk: 18,
            cs: 5,
            tcs: 4,
            dc: 26,
            rst: Some(27),
            backlight: Some(32),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_units_share_host() {
        assert_eq!(TFT_PINS.disp_unit & 3, TFT_HOST);
        assert_eq!(TFT_PINS.touch_unit & 3, TFT_HOST);
        assert_ne!(TFT_PINS.disp_unit, TFT_PINS.touch_unit);
        assert_eq!(TftPins::default(), TFT_PINS);
    }
}
