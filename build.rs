use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=PEREGRINE_LIB_DIR");

    // Linking only happens for the `native` feature; the default build
    // compiles the in-process stub backend instead.
    if env::var_os("CARGO_FEATURE_NATIVE").is_none() {
        return;
    }

    // Prefer pkg-config when a .pc file is installed; it emits the full
    // set of link-search and link-lib directives itself.
    if pkg_config::Config::new().probe("peregrine").is_ok() {
        return;
    }

    if let Ok(dir) = env::var("PEREGRINE_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }
    println!("cargo:rustc-link-lib=peregrine");

    // Peregrine is a C++ library, so it depends on the C++ standard
    // library. On macOS that is libc++, elsewhere libstdc++.
    if cfg!(target_os = "macos") {
        println!("cargo:rustc-link-lib=c++");
    } else {
        println!("cargo:rustc-link-lib=stdc++");
    }
}
