use std::env;

fn main() {
    println!("cargo::rustc-check-cfg=cfg(memguard_isolated_namespace)");
    println!("cargo::rerun-if-env-changed=CARGO_FEATURE_ISOLATED_NAMESPACE");

    let vendor = env::var("CARGO_CFG_TARGET_VENDOR").unwrap_or_default();
    let forced = env::var_os("CARGO_FEATURE_ISOLATED_NAMESPACE").is_some();

    // Apple images resolve symbols per two-level namespace, so interposing by
    // name does not reach other images: patch entry points instead.
    if vendor == "apple" || forced {
        println!("cargo::rustc-cfg=memguard_isolated_namespace");
    }
}
