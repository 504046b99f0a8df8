use echo_core::port;

use crate::ui;

pub fn execute(text: &str) -> i32 {
    match port::require(text) {
        Ok(port) => {
            ui::print_success(&format!("port {port} is valid"));
            0
        }
        Err(err) => {
            ui::print_error(&err.to_string());
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_exit_codes() {
        assert_eq!(execute("8080"), 0);
        assert_eq!(execute("65535"), 0);
        assert_eq!(execute("0"), 2);
        assert_eq!(execute("not-a-port"), 2);
    }
}
