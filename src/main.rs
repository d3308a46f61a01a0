//! android-tools
//!
//! Command line front end for SDK/NDK/JDK discovery and toolchain
//! installation.

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use android_tools::core::{CancellationToken, Platform, UserPreferences};
use android_tools::toolchain::{
    known_system_jdks, AndroidSdkInfo, AndroidVersions, JdkInstaller, SdkInfoOptions, SdkManager,
    DEFAULT_JDK_VERSION,
};
use android_tools::toolchain::jdk_installer::default_install_dir;

const USAGE: &str = "\
usage: android-tools [command]

commands:
  info                 show the detected Android SDK, NDK and JDK (default)
  ls-jdks              list every JDK found on this machine
  ls-platforms         list installed Android platforms
  ls-packages          list SDK packages reported by sdkmanager
  install-jdk [major]  install a Microsoft OpenJDK build into ~/android-toolchain";

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("info") => show_info(),
        Some("ls-jdks") => list_jdks(),
        Some("ls-platforms") => list_platforms(),
        Some("ls-packages") => list_packages().await,
        Some("install-jdk") => install_jdk(args.get(1).map(String::as_str)).await,
        Some("-h") | Some("--help") | Some("help") => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(other) => bail!("unknown command `{}`\n\n{}", other, USAGE),
    }
}

fn detect() -> Result<AndroidSdkInfo> {
    AndroidSdkInfo::new(SdkInfoOptions::from_environment()).context("Android toolchain detection failed")
}

fn show_info() -> Result<()> {
    let sdk = detect()?;
    println!("Android SDK: {}", sdk.android_sdk_path().display());
    match sdk.android_ndk_path() {
        Some(ndk) => println!("Android NDK: {}", ndk.display()),
        None => println!("Android NDK: (not found)"),
    }
    println!("Java SDK:    {}", sdk.java_sdk_path().display());
    if let Some(adb) = sdk.adb_path() {
        println!("adb:         {}", adb.display());
    }
    for build_tools in sdk.build_tools_paths(None).iter().take(1) {
        println!("build-tools: {}", build_tools.display());
    }
    Ok(())
}

fn list_jdks() -> Result<()> {
    let preferences = UserPreferences::load().unwrap_or_default();
    let jdks = known_system_jdks(&Platform::current(), &preferences);
    if jdks.is_empty() {
        println!("No JDKs found");
    }
    for jdk in jdks {
        let version = jdk.version().map(|v| v.to_string()).unwrap_or_else(|| "?".into());
        println!(
            "{:<12} {:<24} {} [{}]",
            version,
            jdk.vendor().unwrap_or_default(),
            jdk.home_path().display(),
            jdk.locator().unwrap_or("unknown"),
        );
    }
    Ok(())
}

fn list_platforms() -> Result<()> {
    let sdk = detect()?;
    let versions = AndroidVersions::default();
    for version in sdk.installed_platform_versions(&versions) {
        println!(
            "android-{:<6} API {:<3} Android {}",
            version.id, version.api_level, version.os_version
        );
    }
    Ok(())
}

async fn list_packages() -> Result<()> {
    let sdk = detect()?;
    let manager = SdkManager::new(sdk.android_sdk_path(), sdk.platform().clone())?
        .with_java_home(sdk.java_sdk_path());
    let packages = manager.list(&CancellationToken::new()).await?;

    println!("Installed:");
    for package in &packages.installed {
        println!("  {:<48} {}", package.path, package.version);
    }
    println!("Available:");
    for package in &packages.available {
        println!("  {:<48} {}", package.path, package.version);
    }
    Ok(())
}

async fn install_jdk(major: Option<&str>) -> Result<()> {
    let version = match major {
        Some(v) => v.parse::<u32>().with_context(|| format!("invalid JDK version `{}`", v))?,
        None => DEFAULT_JDK_VERSION,
    };
    let target = default_install_dir(version).context("Could not determine the home directory")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let installer = JdkInstaller::new(Platform::current())?;
    if installer.is_valid_install(&target, version) {
        info!("JDK {} is already installed at {:?}", version, target);
        return Ok(());
    }

    let jdk = installer.install(version, &target, &cancel, None).await?;
    println!("Installed JDK {} to {}", version, jdk.home_path().display());
    Ok(())
}
