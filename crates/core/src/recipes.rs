//! Built-in tasks for the chat server workspace
//!
//! Each recipe plans the steps of one task from a [`BuildContext`]. Recipes
//! never run anything themselves; ordering between tasks is expressed through
//! dependencies in [`builtin_tasks`], not by one recipe calling another.

use std::path::PathBuf;

use crate::builder::BuildContext;
use crate::execution::command::{Command, FsOp, Step};
use crate::platform::BuildTarget;
use crate::registry::{TaskDefinition, TaskRegistry};
use crate::types::RunbookResult;

const COMPOSE_GENERATOR: &str = "./build/docker-compose-generator/main.go";
const DEPENDENCIES_COMPOSE_FILE: &str = "docker-compose.makefile.yml";
/// Generated by start_docker, consumed by the compose invocation right after it
pub const ENABLED_SERVICES_FILE: &str = "enabled_services.yml";
const TEST_LOG_FILE: &str = "test_log.txt";
const TOOLS_MODFILE: &str = "-modfile=go.tools.mod";

const WEBAPP_COMPOSE_FILES: [&str; 2] = [
    "deploy/docker-compose.minimum.yml",
    "deploy/docker-compose.with-webapp.yml",
];

const CERT_DIR: &str = "deploy/volumes/web/cert";

const DEPLOY_FOLDERS: &[&str] = &[
    "deploy/volumes/db/var/lib/postgresql/data",
    "deploy/volumes/app/server/config",
    "deploy/volumes/app/server/data",
    "deploy/volumes/app/server/logs",
    "deploy/volumes/app/server/plugins",
    "deploy/volumes/app/server/client-plugins",
    CERT_DIR,
];

/// Built-in task definitions in the order they are listed
pub fn builtin_tasks() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::builtin(
            "start_docker",
            "Start necessary services in docker",
            start_docker,
        ),
        TaskDefinition::builtin("start_server", "Start server instance", start_server),
        TaskDefinition::builtin(
            "test_data",
            "Add test data to the local instance",
            test_data,
        )
        .depends_on(&["start_docker"]),
        TaskDefinition::builtin(
            "test_folder",
            "Run the tests of one package: <package>",
            test_folder,
        ),
        TaskDefinition::builtin("store_mocks", "Creates mock files for stores", store_mocks),
        TaskDefinition::builtin(
            "einterfaces_mocks",
            "Creates mock files for einterfaces",
            einterfaces_mocks,
        ),
        TaskDefinition::builtin(
            "app_layers",
            "Extract interface from App struct",
            app_layers,
        ),
        TaskDefinition::builtin(
            "store_layers",
            "Generate layers for the store",
            store_layers,
        ),
        TaskDefinition::builtin(
            "build_linux",
            "Build server binaries for linux/amd64",
            build_linux,
        ),
        TaskDefinition::builtin(
            "build_windows",
            "Build server binaries for windows/amd64",
            build_windows,
        ),
        TaskDefinition::builtin(
            "build_target",
            "Build server binaries for a platform: <os> <arch>",
            build_target,
        ),
        TaskDefinition::builtin(
            "package_docker_image",
            "Assemble the distribution tree used by the server image",
            package_docker_image,
        )
        .depends_on(&["build_linux"]),
        TaskDefinition::builtin(
            "build_docker_image",
            "Build the server image: <tag>",
            build_docker_image,
        ),
        TaskDefinition::builtin(
            "push_docker_image",
            "Log in and push the server image: <tag>",
            push_docker_image,
        ),
        TaskDefinition::builtin(
            "build_docker_nginx_data_image",
            "Build the nginx data image: <tag>",
            build_docker_nginx_data_image,
        ),
        TaskDefinition::builtin(
            "build_docker_app_data_image",
            "Build the application data image: <tag>",
            build_docker_app_data_image,
        ),
        TaskDefinition::builtin(
            "push_docker_nginx_data_image",
            "Push the nginx data image: <tag>",
            push_docker_nginx_data_image,
        ),
        TaskDefinition::builtin(
            "push_docker_app_data_image",
            "Push the application data image: <tag>",
            push_docker_app_data_image,
        ),
        TaskDefinition::builtin(
            "docker_webapp",
            "Run a compose action on the webapp stack: <action...>",
            docker_webapp,
        ),
        TaskDefinition::builtin(
            "create_deploy_folders",
            "Create the volume folders used by the deploy stack",
            create_deploy_folders,
        ),
        TaskDefinition::builtin(
            "deploy_compose",
            "Start the webapp stack in the background",
            deploy_compose,
        )
        .depends_on(&["create_deploy_folders"]),
        TaskDefinition::builtin(
            "issue_cert_standalone",
            "Issue a certificate with certbot: <domain> [output]",
            issue_cert_standalone,
        ),
    ]
}

pub fn register_builtin_tasks(registry: &mut TaskRegistry) -> RunbookResult<()> {
    for definition in builtin_tasks() {
        registry.register(definition)?;
    }
    Ok(())
}

/// Services handed to the compose generator: the configured list, plus the
/// ones the server always needs, without duplicates
fn docker_services(ctx: &BuildContext<'_>) -> Vec<String> {
    let mut services: Vec<String> = Vec::new();
    let configured = ctx.setting_or_empty("ENABLED_DOCKER_SERVICES");
    let mut wanted: Vec<&str> = configured.split_whitespace().collect();
    wanted.push("minio");
    if ctx.settings.flag("BUILD_ENTERPRISE_READY") {
        wanted.extend(["openldap", "elasticsearch"]);
    }
    for service in wanted {
        if !services.iter().any(|s| s == service) {
            services.push(service.to_string());
        }
    }
    services
}

fn start_docker(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    if ctx.settings.flag("IS_CI") {
        return Ok(vec![Step::notice("CI build: skipping docker start")]);
    }
    if ctx.settings.flag("NO_DOCKER") {
        return Ok(vec![Step::notice("No docker enabled: skipping docker start")]);
    }

    Ok(vec![
        Step::notice("Starting docker containers"),
        Step::Run(
            Command::new(ctx.go()?)
                .args(["run", COMPOSE_GENERATOR])
                .args(docker_services(ctx))
                .stdout_to(ENABLED_SERVICES_FILE),
        ),
        Step::Run(Command::new(ctx.setting("DOCKER_COMPOSE")?).args([
            "-f",
            DEPENDENCIES_COMPOSE_FILE,
            "-f",
            ENABLED_SERVICES_FILE,
            "run",
            "--rm",
            "start_dependencies",
        ])),
    ])
}

fn test_data(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let main = ctx.setting("SERVER_MAIN")?;
    Ok(vec![
        Step::Run(ctx.go_with_ldflags("run")?.arg(main.clone()).args([
            "config",
            "set",
            "TeamSettings.MaxUsersPerTeam",
            "100",
        ])),
        Step::Run(ctx.go_with_ldflags("run")?.arg(main).args([
            "sampledata".to_string(),
            "-w".to_string(),
            ctx.setting("SAMPLEDATA_WORKERS")?,
            "-u".to_string(),
            ctx.setting("SAMPLEDATA_USERS")?,
        ])),
        Step::notice("You may need to restart the server before using the following"),
        Step::notice(
            "Login with a system admin account username=sysadmin password=Sys@dmin-sample1",
        ),
        Step::notice("Login with a regular account username=user-1 password=SampleUs@r-1"),
    ])
}

fn start_server(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let go = ctx.go()?;
    Ok(vec![
        Step::Run(Command::new(go.clone()).arg("version")),
        Step::Run(Command::new(go).arg("run").arg(ctx.setting("SERVER_MAIN")?)),
    ])
}

fn install_tool(ctx: &BuildContext<'_>, package: &str) -> RunbookResult<Step> {
    Ok(Step::Run(Command::new(ctx.go()?).args(["get", TOOLS_MODFILE, package])))
}

fn tool(ctx: &BuildContext<'_>, name: &str) -> RunbookResult<Command> {
    Ok(Command::new(ctx.gobin()?.join(name).display().to_string()))
}

fn mockery(ctx: &BuildContext<'_>, dir: &str, output: &str) -> RunbookResult<Vec<Step>> {
    let note = format!("Regenerate this file using `runbook run {}`.", ctx.task);
    Ok(vec![
        install_tool(ctx, "github.com/vektra/mockery/...")?,
        Step::Run(tool(ctx, "mockery")?.args([
            "-dir",
            dir,
            "-all",
            "-output",
            output,
            "-note",
            note.as_str(),
        ])),
    ])
}

fn store_mocks(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let mut steps = mockery(ctx, "store", "store/storetest/mocks")?;
    steps.push(Step::Fs(FsOp::Remove {
        path: PathBuf::from("store/storetest/mocks/StoreTestBaseSuite.go"),
    }));
    Ok(steps)
}

fn einterfaces_mocks(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    mockery(ctx, "einterfaces", "einterfaces/mocks")
}

fn app_layers(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    Ok(vec![
        install_tool(ctx, "github.com/reflog/struct2interface")?,
        Step::Run(tool(ctx, "struct2interface")?.args([
            "-f",
            "app",
            "-o",
            "app/app_iface.go",
            "-p",
            "app",
            "-s",
            "App",
            "-i",
            "AppIface",
            "-t",
            "./app/layer_generators/app_iface.go.tmpl",
        ])),
        Step::Run(Command::new(ctx.go()?).args([
            "run",
            "./app/layer_generators",
            "-in",
            "./app/app_iface.go",
            "-out",
            "./app/opentracing/opentracing_layer.go",
            "-template",
            "./app/layer_generators/opentracing_layer.go.tmpl",
        ])),
    ])
}

fn store_layers(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    Ok(vec![Step::Run(
        Command::new(ctx.go()?)
            .arg("generate")
            .args(ctx.go_flags()?)
            .arg("./store"),
    )])
}

fn test_folder(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let package = ctx.arg(0, "package")?;
    let module = ctx.setting("GO_MODULE")?;
    let import_path = format!(
        "{}/{}",
        module.trim_end_matches('/'),
        package.trim_start_matches("./").trim_matches('/')
    );
    Ok(vec![Step::Run(
        Command::new(ctx.go()?)
            .args(["test", "-timeout", "60m"])
            .arg(import_path)
            .stdout_to(TEST_LOG_FILE),
    )])
}

fn build_for(ctx: &BuildContext<'_>, target: BuildTarget) -> RunbookResult<Vec<Step>> {
    let binary = ctx.setting("SERVER_BINARY")?;
    let out_dir = ctx.gobin()?.join(target.output_dir(&binary));
    Ok(vec![
        Step::Fs(FsOp::CreateDir {
            path: out_dir.clone(),
        }),
        Step::Run(
            Command::new(ctx.go()?)
                .arg("build")
                .arg("-o")
                .arg(out_dir.display().to_string())
                .args(ctx.go_flags()?)
                .arg("-trimpath")
                .arg("-ldflags")
                .arg(ctx.ldflags()?)
                .arg("./...")
                .env("GOOS", target.os)
                .env("GOARCH", target.arch),
        ),
    ])
}

fn build_linux(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    build_for(ctx, BuildTarget::LINUX_AMD64)
}

fn build_windows(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    build_for(ctx, BuildTarget::WINDOWS_AMD64)
}

fn build_target(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let target = BuildTarget::from_os_arch(ctx.arg(0, "os")?, ctx.arg(1, "arch")?)
        .map_err(|message| ctx.fail(message))?;
    build_for(ctx, target)
}

fn package_docker_image(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let dist_root = PathBuf::from(ctx.setting("DIST_ROOT")?);
    let binary = ctx.setting("SERVER_BINARY")?;
    let dist = dist_root.join(&binary);
    let target = BuildTarget::LINUX_AMD64;
    let built = ctx
        .gobin()?
        .join(target.output_dir(&binary))
        .join(target.executable(&binary));

    let mut steps = vec![Step::Fs(FsOp::Remove { path: dist_root })];
    for dir in ["bin", "logs", "prepackaged_plugins", "config"] {
        steps.push(Step::Fs(FsOp::CreateDir {
            path: dist.join(dir),
        }));
    }
    steps.push(Step::Run(
        Command::new(ctx.go()?)
            .args(["run", "./scripts/config_generator"])
            .env(
                "OUTPUT_CONFIG",
                ctx.absolute(dist.join("config").join("config.json"))
                    .display()
                    .to_string(),
            ),
    ));
    steps.push(Step::Fs(FsOp::CopyTree {
        from: PathBuf::from("fonts"),
        to: dist.join("fonts"),
        exclude: Vec::new(),
    }));
    steps.push(Step::Fs(FsOp::CopyTree {
        from: PathBuf::from("templates"),
        to: dist.join("templates"),
        exclude: vec!["*.mjml".to_string(), "partials".to_string()],
    }));
    steps.push(Step::Fs(FsOp::CopyTree {
        from: PathBuf::from("i18n"),
        to: dist.join("i18n"),
        exclude: Vec::new(),
    }));
    steps.push(Step::Fs(FsOp::CopyFile {
        from: built,
        to: dist.join("bin"),
    }));
    Ok(steps)
}

/// Docker tag grammar: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
fn image_tag<'a>(ctx: &BuildContext<'a>) -> RunbookResult<&'a str> {
    let tag = ctx.arg(0, "tag")?;
    let mut chars = tag.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid_first || !valid_rest || tag.len() > 128 {
        return Err(ctx.fail(format!("'{}' is not a valid image tag", tag)));
    }
    Ok(tag)
}

fn image_ref(ctx: &BuildContext<'_>, image_setting: &str) -> RunbookResult<String> {
    Ok(format!("{}:{}", ctx.setting(image_setting)?, image_tag(ctx)?))
}

fn docker_build(
    ctx: &BuildContext<'_>,
    image_setting: &str,
    dockerfile: &str,
) -> RunbookResult<Vec<Step>> {
    Ok(vec![Step::Run(
        Command::new(ctx.setting("DOCKER")?)
            .args(["build", "-f", dockerfile, "-t"])
            .arg(image_ref(ctx, image_setting)?)
            .arg("."),
    )])
}

fn docker_push(ctx: &BuildContext<'_>, image_setting: &str) -> RunbookResult<Step> {
    Ok(Step::Run(
        Command::new(ctx.setting("DOCKER")?)
            .arg("push")
            .arg(image_ref(ctx, image_setting)?),
    ))
}

fn build_docker_image(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    docker_build(ctx, "DOCKER_IMAGE", "./build/Dockerfile")
}

fn build_docker_nginx_data_image(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    docker_build(ctx, "NGINX_DATA_IMAGE", "./deploy/Dockerfile.nginxdata")
}

fn build_docker_app_data_image(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    docker_build(ctx, "APP_DATA_IMAGE", "./deploy/Dockerfile.appdata")
}

fn push_docker_image(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let username = ctx.setting("DOCKER_USERNAME")?;
    let password = ctx.setting("DOCKER_PASSWORD")?;
    Ok(vec![
        // The password goes through stdin so it never shows up in argv
        Step::Run(
            Command::new(ctx.setting("DOCKER")?)
                .args(["login", "--username"])
                .arg(username)
                .arg("--password-stdin")
                .stdin(password),
        ),
        docker_push(ctx, "DOCKER_IMAGE")?,
    ])
}

fn push_docker_nginx_data_image(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    Ok(vec![docker_push(ctx, "NGINX_DATA_IMAGE")?])
}

fn push_docker_app_data_image(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    Ok(vec![docker_push(ctx, "APP_DATA_IMAGE")?])
}

/// `<base> -f minimum.yml -f with-webapp.yml`
fn webapp_compose(base: Command) -> Command {
    WEBAPP_COMPOSE_FILES
        .iter()
        .fold(base, |command, file| command.arg("-f").arg(*file))
}

fn docker_webapp(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    ctx.arg(0, "action")?;
    Ok(vec![Step::Run(
        webapp_compose(Command::new(ctx.setting("DOCKER_COMPOSE")?)).args(ctx.args.iter().cloned()),
    )])
}

fn deploy_compose(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let docker = Command::new(ctx.setting("DOCKER")?).arg("compose");
    Ok(vec![Step::Run(webapp_compose(docker).args(["up", "-d"]))])
}

fn create_deploy_folders(_ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    Ok(DEPLOY_FOLDERS
        .iter()
        .map(|dir| Step::Fs(FsOp::CreateDir { path: PathBuf::from(dir) }))
        .collect())
}

fn issue_cert_standalone(ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let domain = ctx.arg(0, "domain")?;
    let mut steps = Vec::new();
    let output = match ctx.optional_arg(1) {
        Some(output) => ctx.absolute(output),
        None => {
            let output = PathBuf::from(CERT_DIR);
            for dir in ["etc/letsencrypt", "lib/letsencrypt"] {
                steps.push(Step::Fs(FsOp::CreateDir {
                    path: output.join(dir),
                }));
            }
            ctx.absolute(output)
        }
    };
    let port = ctx.setting("CERT_HTTP_PORT")?;

    steps.push(Step::Run(
        Command::new(ctx.setting("DOCKER")?)
            .args(["run", "-i", "--rm", "--name", "certbot", "-p"])
            .arg(format!("{}:80", port))
            .arg("-v")
            .arg(format!(
                "{}:/etc/letsencrypt",
                output.join("etc/letsencrypt").display()
            ))
            .arg("-v")
            .arg(format!(
                "{}:/var/lib/letsencrypt",
                output.join("lib/letsencrypt").display()
            ))
            .args(["certbot/certbot", "certonly", "--standalone", "-d"])
            .arg(domain),
    ));
    Ok(steps)
}
