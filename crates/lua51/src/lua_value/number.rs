// Number <-> string conversions and the small numeric helpers shared by the
// compiler, the interpreter and the table

/// Parse a numeral the way `tonumber` and string coercion do: optional
/// surrounding whitespace, decimal floats with exponent, or a `0x` hex
/// integer (optionally signed).
pub fn str2number(s: &[u8]) -> Option<f64> {
    let s = trim_space(s);
    if s.is_empty() {
        return None;
    }

    let (neg, digits) = match s[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.len() > 2 && digits[0] == b'0' && (digits[1] == b'x' || digits[1] == b'X') {
        let hex = &digits[2..];
        let mut n: f64 = 0.0;
        for &c in hex {
            let d = (c as char).to_digit(16)?;
            n = n * 16.0 + d as f64;
        }
        return Some(if neg { -n } else { n });
    }

    // Reject the spellings Rust accepts but the numeral grammar does not
    if !digits
        .iter()
        .all(|c| c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    let text = std::str::from_utf8(s).ok()?;
    text.parse::<f64>().ok()
}

fn trim_space(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() || *first == 0x0b {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() || *last == 0x0b {
            s = rest;
        } else {
            break;
        }
    }
    s
}

/// Format a number like C's `%.14g`
pub fn number2str(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e14 {
        if n == 0.0 && n.is_sign_negative() {
            return "-0".to_string();
        }
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    format_g(n, 14)
}

fn format_g(n: f64, precision: usize) -> String {
    // Scientific form first, to learn the exponent after rounding
    let sci = format!("{:.*e}", precision - 1, n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= precision as i32 {
        let mantissa = strip_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.unsigned_abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, n);
        strip_zeros(&fixed).to_string()
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Lua's modulo: result has the sign of the divisor
#[inline(always)]
pub fn lua_mod(a: f64, b: f64) -> f64 {
    a - (a / b).floor() * b
}

/// `Some(k)` when `n` is exactly the integer `k`
#[inline(always)]
pub fn as_integer(n: f64) -> Option<i64> {
    let k = n as i64;
    if k as f64 == n { Some(k) } else { None }
}

/// Encode an unsigned size as a "floating point byte" (eeeeexxx)
pub fn int2fb(mut x: u32) -> u32 {
    let mut e = 0;
    while x >= 16 {
        x = (x + 1) >> 1;
        e += 1;
    }
    if x < 8 { x } else { ((e + 1) << 3) | (x - 8) }
}

pub fn fb2int(x: u32) -> usize {
    let e = (x >> 3) & 31;
    if e == 0 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << (e - 1)
    }
}

/// ceil(log2(x)) for x >= 1
pub fn ceil_log2(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        usize::BITS - (x - 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number2str_matches_g14() {
        assert_eq!(number2str(5.0), "5");
        assert_eq!(number2str(-0.0), "-0");
        assert_eq!(number2str(0.1), "0.1");
        assert_eq!(number2str(1.0 / 3.0), "0.33333333333333");
        assert_eq!(number2str(99999999999999.0), "99999999999999");
        assert_eq!(number2str(1e14), "1e+14");
        assert_eq!(number2str(1e15), "1e+15");
        assert_eq!(number2str(1e-5), "1e-05");
        assert_eq!(number2str(f64::INFINITY), "inf");
        assert_eq!(number2str(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_str2number_grammar() {
        assert_eq!(str2number(b" 42 "), Some(42.0));
        assert_eq!(str2number(b"0x1F"), Some(31.0));
        assert_eq!(str2number(b"-0x10"), Some(-16.0));
        assert_eq!(str2number(b"1e3"), Some(1000.0));
        assert_eq!(str2number(b".5"), Some(0.5));
        assert_eq!(str2number(b""), None);
        assert_eq!(str2number(b"inf"), None);
        assert_eq!(str2number(b"nan"), None);
        assert_eq!(str2number(b"12abc"), None);
    }

    #[test]
    fn test_fb_roundtrip_is_monotonic() {
        for x in [0u32, 1, 7, 8, 15, 16, 17, 100, 1000, 50_000] {
            assert!(fb2int(int2fb(x)) >= x as usize);
        }
        assert_eq!(fb2int(int2fb(7)), 7);
    }

    #[test]
    fn test_lua_mod_sign_follows_divisor() {
        assert_eq!(lua_mod(-7.0, 3.0), 2.0);
        assert_eq!(lua_mod(7.0, -3.0), -2.0);
        assert_eq!(lua_mod(5.5, 2.0), 1.5);
    }
}
