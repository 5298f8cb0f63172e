use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

/// Stand-in for the server entry point.
///
/// Understands two flags on top of `--config <path>`:
/// `--exit-code <n>` returns `n`, `--record <file>` writes argv to `file`, one per line.
///
/// # Safety
/// `argv` must hold `argc` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn start_app(argc: c_int, argv: *const *const c_char) -> u8 {
    if argv.is_null() || argc < 0 {
        return 2;
    }

    let mut args = Vec::with_capacity(argc as usize);
    for i in 0..argc as usize {
        let ptr = *argv.add(i);
        if ptr.is_null() {
            return 3;
        }
        match CStr::from_ptr(ptr).to_str() {
            Ok(s) => args.push(s.to_owned()),
            Err(_) => return 4,
        }
    }

    let mut exit_code = 0u8;
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--exit-code" => {
                exit_code = match iter.next().and_then(|v| v.parse().ok()) {
                    Some(code) => code,
                    None => return 5,
                };
            }
            "--record" => {
                let Some(path) = iter.next() else { return 6 };
                if std::fs::write(path, args.join("\n")).is_err() {
                    return 7;
                }
            }
            _ => {}
        }
    }
    exit_code
}
