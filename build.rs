//! Assembles `asm/aarch64.S` on AArch64 targets, mirroring the teacher
//! crate's own choice to keep that architecture's register swap in a
//! separately compiled object rather than inline asm.

fn main() {
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let target_family = std::env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();

    if target_arch == "aarch64" && target_family == "unix" {
        // The `cc` crate recognizes the `.S` extension and preprocesses it
        // before handing it to the assembler, same as a C build would.
        cc::Build::new()
            .file("asm/aarch64.S")
            .compile("mprompt_aarch64_asm");
        println!("cargo:rerun-if-changed=asm/aarch64.S");
    }
}
