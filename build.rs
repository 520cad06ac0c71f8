/// GUID identifying the bundled demo host. Packagers override it per application with
/// `LONE_INSTANCE_APP_GUID=<guid> cargo build`.
const DEMO_APP_GUID: &str = "7f4c1d2e-9b3a-4e5f-8c6d-0a1b2c3d4e5f";

fn main() {
    println!("cargo:rerun-if-env-changed=LONE_INSTANCE_APP_GUID");
    let guid = std::env::var("LONE_INSTANCE_APP_GUID").unwrap_or_else(|_| DEMO_APP_GUID.to_owned());
    println!("cargo:rustc-env=LONE_INSTANCE_APP_GUID={}", guid.trim());

    if cfg!(windows) {
        let mut res = winres::WindowsResource::new();
        res.set("FileDescription", env!("CARGO_PKG_DESCRIPTION"));
        res.set("ProductName", "Lone Instance");
        res.compile().unwrap();
    }
}
