//! SPI clock divisor calculation.
//!
//! The SPI clock generator divides the 80 MHz APB clock by `(PRE + 1) * (N + 1)`.
//! `L` (and `H`) shape the duty cycle. Register layout:
//!
//! | bits   | field      |
//! |--------|------------|
//! | 0..5   | L          |
//! | 6..11  | H          |
//! | 12..17 | N          |
//! | 18..30 | PRE        |
//! | 31     | EQU_SYSCLK |

/// Clock feeding the SPI clock generator.
pub const SYSTEM_CLOCK_HZ: u32 = 80_000_000;

const N_MAX: u32 = 0x3F;
const PRE_MAX: u32 = 0x1FFF;

/// Encoded value for the SPI clock register.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockDivisor(pub u32);

impl ClockDivisor {
    /// SPI clock equal to the system clock.
    pub const EQU_SYSCLK: Self = Self(1 << 31);

    /// Slowest clock the generator can produce (PRE and N at maximum).
    pub const SLOWEST: Self = Self::from_parts(PRE_MAX, N_MAX, 0);

    pub const fn from_parts(pre: u32, n: u32, l: u32) -> Self {
        Self(((pre & PRE_MAX) << 18) | ((n & N_MAX) << 12) | (l & 0x3F))
    }

    #[inline]
    pub const fn pre(self) -> u32 {
        (self.0 >> 18) & PRE_MAX
    }

    #[inline]
    pub const fn n(self) -> u32 {
        (self.0 >> 12) & N_MAX
    }

    #[inline]
    pub const fn l(self) -> u32 {
        self.0 & 0x3F
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Frequency (Hz) produced by a divisor encoding.
pub const fn divisor_to_frequency(div: ClockDivisor) -> u32 {
    SYSTEM_CLOCK_HZ / ((div.pre() + 1) * (div.n() + 1))
}

/// Closest divisor producing at most `hz`.
pub fn frequency_to_divisor(hz: u32) -> ClockDivisor {
    if hz >= SYSTEM_CLOCK_HZ {
        return ClockDivisor::EQU_SYSCLK;
    }

    if hz < divisor_to_frequency(ClockDivisor::SLOWEST) {
        return ClockDivisor::SLOWEST;
    }

    let target = hz as i64;
    let mut best = ClockDivisor(0);
    let mut best_freq: i64 = 0;

    for n in 1..=N_MAX {
        let base = (SYSTEM_CLOCK_HZ / (n + 1) / hz) as i64 - 1;

        for vari in -1..=2i64 {
            let pre = (base + vari).clamp(0, PRE_MAX as i64) as u32;
            let candidate = ClockDivisor::from_parts(pre, n, (n + 1) / 2);
            let freq = divisor_to_frequency(candidate) as i64;

            if freq == target {
                return candidate;
            }
            if freq < target && (target - freq) < (target - best_freq) {
                best_freq = freq;
                best = candidate;
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_or_above_sysclk() {
        assert_eq!(frequency_to_divisor(SYSTEM_CLOCK_HZ), ClockDivisor::EQU_SYSCLK);
        assert_eq!(frequency_to_divisor(u32::MAX), ClockDivisor::EQU_SYSCLK);
        assert_eq!(divisor_to_frequency(ClockDivisor::EQU_SYSCLK), SYSTEM_CLOCK_HZ);
    }

    #[test]
    fn test_below_floor() {
        let floor = divisor_to_frequency(ClockDivisor::SLOWEST);
        assert_eq!(ClockDivisor::SLOWEST.bits(), 0x7FFF_F000);
        assert_eq!(floor, 152);
        assert_eq!(frequency_to_divisor(floor - 1), ClockDivisor::SLOWEST);
        assert_eq!(frequency_to_divisor(1), ClockDivisor::SLOWEST);
    }

    #[test]
    fn test_exact_frequencies() {
        for hz in [20_000_000, 10_000_000, 2_500_000, 1_000_000, 40_000] {
            let div = frequency_to_divisor(hz);
            assert_eq!(divisor_to_frequency(div), hz, "{} Hz", hz);
        }

        // 20 MHz: N = 1, PRE = 1
        let div = frequency_to_divisor(20_000_000);
        assert_eq!((div.n(), div.pre(), div.l()), (1, 1, 1));
    }

    #[test]
    fn test_never_exceeds_target_and_is_stable() {
        for hz in [153, 1_000, 33_333, 270_000, 3_300_000, 27_000_000, 50_000_000, 79_999_999] {
            let div = frequency_to_divisor(hz);
            let got = divisor_to_frequency(div);
            assert!(got <= hz, "{} Hz -> {} Hz", hz, got);
            assert_eq!(frequency_to_divisor(hz), div);
        }
    }

    #[test]
    fn test_above_half_sysclk_rounds_down() {
        // With N >= 1 the fastest divided clock is SYSCLK / 2.
        let div = frequency_to_divisor(50_000_000);
        assert_eq!(divisor_to_frequency(div), 40_000_000);
    }

    #[test]
    fn test_close_to_target() {
        // One quantization step at 27 MHz: neighbouring achievable clocks are
        // 26.67 MHz (80/3) and 40 MHz (80/2).
        let got = divisor_to_frequency(frequency_to_divisor(27_000_000));
        assert_eq!(got, 26_666_666);
    }
}
