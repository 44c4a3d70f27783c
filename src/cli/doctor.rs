use std::env;

use anyhow::Result;
use veilbrowser::cdp_bridge::default_executable;
use veilbrowser::flags::HEADLESS_ENV;
use veilbrowser::HeadlessMode;

/// Reports what a connect on this host would find: browser binary, Xvfb,
/// display, and the resolved headless default.
pub fn cmd_doctor() -> Result<()> {
    match default_executable() {
        Some(path) => println!("browser executable: {}", path.display()),
        None => println!(
            "browser executable: not found (set VEIL_EXECUTABLE or install chromium/brave)"
        ),
    }

    match which::which("Xvfb") {
        Ok(path) => println!("xvfb: {}", path.display()),
        Err(_) => println!("xvfb: not found (headful sessions will run without a virtual display)"),
    }

    match env::var("DISPLAY") {
        Ok(value) if !value.trim().is_empty() => println!("display: {value}"),
        _ => println!("display: none"),
    }

    if let Ok(value) = env::var(HEADLESS_ENV) {
        println!("{HEADLESS_ENV}: {value}");
    }
    let mode = HeadlessMode::resolve(None);
    println!(
        "headless default: {}",
        if mode.is_headless() {
            "headless"
        } else {
            "headful"
        }
    );

    Ok(())
}
