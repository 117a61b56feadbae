//! Argentine tax id (CUIT) and bank account key (CBU) check digits.

fn digits(s: &str, len: usize) -> Option<Vec<u32>> {
    if s.len() != len {
        return None;
    }
    s.chars().map(|c| c.to_digit(10)).collect()
}

fn weighted(digits: &[u32], weights: &[u32]) -> u32 {
    digits.iter().zip(weights).map(|(d, w)| d * w).sum()
}

/// 11 digits; the last is the mod-11 check digit. A remainder that yields 10 is never valid.
pub fn validate_cuit(cuit: &str) -> bool {
    const WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];
    let Some(d) = digits(cuit, 11) else {
        return false;
    };
    let check = match 11 - weighted(&d[..10], &WEIGHTS) % 11 {
        11 => 0,
        10 => return false,
        n => n,
    };
    check == d[10]
}

/// 22 digits in two blocks (bank/branch 8, account 14), each ending in a mod-10 check digit.
pub fn validate_cbu(cbu: &str) -> bool {
    const BLOCK_1: [u32; 7] = [7, 1, 3, 9, 7, 1, 3];
    const BLOCK_2: [u32; 13] = [3, 9, 7, 1, 3, 9, 7, 1, 3, 9, 7, 1, 3];
    let Some(d) = digits(cbu, 22) else {
        return false;
    };
    let check = |block: &[u32], weights: &[u32]| {
        let (body, last) = block.split_at(block.len() - 1);
        (10 - weighted(body, weights) % 10) % 10 == last[0]
    };
    check(&d[..8], &BLOCK_1) && check(&d[8..], &BLOCK_2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuit() {
        assert!(validate_cuit("20123456786"));
        assert!(validate_cuit("30500010912"));
        assert!(!validate_cuit("20123456780"));
        assert!(!validate_cuit("20-12345678-6"));
        assert!(!validate_cuit(""));
    }

    #[test]
    fn cbu() {
        assert!(validate_cbu("0110599520000001234569"));
        assert!(!validate_cbu("0110599520000001234568"));
        assert!(!validate_cbu("0110599420000001234569"));
        assert!(!validate_cbu("011059952000000123456"));
        assert!(!validate_cbu("01105995200000012345a9"));
    }
}
