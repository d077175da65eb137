// Build provenance shown by `forgelink version --extended`.
fn main() {
    for (from, to) in [
        ("TARGET", "FORGELINK_BUILD_TARGET"),
        ("PROFILE", "FORGELINK_BUILD_PROFILE"),
    ] {
        println!("cargo:rerun-if-env-changed={from}");
        if let Ok(value) = std::env::var(from) {
            println!("cargo:rustc-env={to}={value}");
        }
    }
}
