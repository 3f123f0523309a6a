//! 订单号校验模块
//!
//! 订单号由外部系统生成，末位为 Luhn 校验位。提交订单与提现请求中
//! 携带的订单号都必须先通过此校验，再触达存储层。

/// Luhn 校验
///
/// 从右往左每隔一位将数字翻倍，翻倍结果大于 9 时减 9，
/// 所有数字求和后能被 10 整除即为合法。
/// 非数字字符或空串直接判为非法。
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum: u32 = 0;
    for (i, c) in number.chars().rev().enumerate() {
        let Some(mut digit) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_number() {
        assert!(is_valid("12345678903"));
        // 经典测试卡号
        assert!(is_valid("4561261212345467"));
    }

    #[test]
    fn test_invalid_number() {
        assert!(!is_valid("1234567890"));
        assert!(!is_valid("1"));
    }

    #[test]
    fn test_single_zero_is_valid() {
        // 0 的校验和为 0，按公式合法
        assert!(is_valid("0"));
    }

    #[test]
    fn test_rejects_non_digits() {
        assert!(!is_valid(""));
        assert!(!is_valid("1234567890a"));
        assert!(!is_valid(" 12345678903"));
        assert!(!is_valid("12-34"));
    }
}
