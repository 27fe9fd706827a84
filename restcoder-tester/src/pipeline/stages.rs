//! The eight pipeline stages
//!
//! Each stage records every container and image in the run's ledger before
//! asking the runtime to create it, since a failed `run` or `commit` may
//! still leave the resource behind. Stages with independent units fan them out
//! through [`try_join_all`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use restcoder_core::domain::result::UnitTestResult;
use restcoder_core::domain::submission::{ProcessInstance, ServiceDescriptor, SubmissionRequest};
use restcoder_core::dto::progress::ProgressEvent;

use super::Run;
use super::fan_out::try_join_all;
use super::rollback::RollbackStep;
use crate::error::{OperationError, PipelineError};
use crate::naming;
use crate::runtime::{ContainerSpec, FirewallRule, shell_quote};
use crate::service::launcher::{self, Launch, ReadySignal};
use crate::service::log_collector::LogPair;

/// Process name whose instances receive HTTP traffic from the tests
pub const WEB_PROCESS: &str = "web";

/// Dependency install command per language
pub fn install_command(language: &str) -> Option<&'static str> {
    match language {
        "nodejs" => Some("npm install"),
        "python" => Some("pip install -r requirements.txt"),
        "ruby" => Some("bundle install"),
        "java" => Some("mvn -q -DskipTests package"),
        "go" => Some("go build ./..."),
        "php" => Some("composer install"),
        _ => None,
    }
}

/// Environment handed to the test runner
///
/// Services contribute their externally reachable URL; every `web` instance
/// contributes `API_URL_<n>`, and instance 0 also `API_URL`.
pub fn test_env(
    host_ip: &str,
    services: &[ServiceDescriptor],
    instances: &[ProcessInstance],
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    for service in services {
        if let Some(url) = &service.external_url {
            env.insert(service.env_name.clone(), url.clone());
        }
    }

    for instance in instances.iter().filter(|i| i.process_name == WEB_PROCESS) {
        let url = format!("http://{}:{}", host_ip, instance.host_port);
        if instance.instance == 0 {
            env.insert("API_URL".to_string(), url.clone());
        }
        env.insert(format!("API_URL_{}", instance.instance), url);
    }

    env
}

/// Shell script starting a user process with its environment exported
pub fn user_script(app_dir: &str, instance: &ProcessInstance) -> String {
    let mut script = String::new();
    for (name, value) in &instance.env {
        script.push_str(&format!("export {}={}\n", name, shell_quote(value)));
    }
    script.push_str(&format!("cd {}\n", shell_quote(app_dir)));
    script.push_str(&instance.command);
    script
}

impl Run {
    /// Runs stages 1 to 8
    pub(super) async fn execute(
        self: &Arc<Self>,
        request: SubmissionRequest,
    ) -> Result<UnitTestResult, PipelineError> {
        self.relay.send(ProgressEvent::Preparing);
        self.log.log_info(format!("Resource prefix {}", self.prefix));

        let image = self.initialize_container(&request).await?;
        let services = self.start_services(request.services.clone()).await?;
        let mut instances = self.prepare_user_containers(&request, &image).await?;
        self.disable_internet_connection(&instances).await?;
        self.link_containers(&services, &mut instances).await?;
        self.start_containers(&instances).await?;

        let env = test_env(&self.config.host_ip, &services, &instances);
        self.start_unit_tests(&request.test_case, &env).await
    }

    /// Uploads the captured logs and attaches their URLs to the failure
    async fn attach_logs(&self, err: OperationError, logs: &LogPair) -> OperationError {
        let (stdout, stderr) = logs.upload(self.storage.as_ref()).await;
        err.with_logs(stdout, stderr)
    }

    /// Runs a script to completion in a container, capturing its output
    async fn exec_logged(
        &self,
        container: &str,
        script: &str,
        timeout: Duration,
        step: &str,
    ) -> Result<LogPair, OperationError> {
        let logs = LogPair::new(step, self.config.log_max_bytes);
        match self.runtime.exec(container, script, timeout, step, &logs).await {
            Ok(()) => Ok(logs),
            Err(e) => Err(self.attach_logs(e, &logs).await),
        }
    }

    /// Stage 2: builds the application image
    ///
    /// # Returns
    /// Name of the committed image
    async fn initialize_container(&self, request: &SubmissionRequest) -> Result<String, PipelineError> {
        let install = install_command(&request.language).ok_or_else(|| {
            OperationError::new(
                "install dependencies",
                format!("Language \"{}\" is not supported", request.language),
            )
        })?;

        let setup = naming::setup_container(&self.prefix);
        let spec = ContainerSpec::new(&setup, &request.docker_image)
            .limits(&self.config.limits.setup)
            .idle();
        self.ledger.push(RollbackStep::RemoveContainer(setup.clone()));
        self.runtime.start_container(&spec).await?;

        let app_dir = shell_quote(&self.config.app_dir);
        let download = format!(
            "mkdir -p {dir} && cd {dir} && curl -sSfL -o /tmp/source.zip {url} \
             && unzip -q -o /tmp/source.zip && rm -f /tmp/source.zip",
            dir = app_dir,
            url = shell_quote(&request.source_url)
        );
        self.log.log_info("Downloading source");
        let logs = self
            .exec_logged(&setup, &download, self.config.timeouts.download, "download source")
            .await?;
        logs.discard().await;

        self.relay.send(ProgressEvent::Install);
        self.log.log_info(format!("Installing dependencies: {}", install));
        let logs = self
            .exec_logged(
                &setup,
                &format!("cd {} && {}", app_dir, install),
                self.config.timeouts.install,
                "install dependencies",
            )
            .await?;
        self.relay.send(ProgressEvent::InstallOk);
        let (install_log, _) = logs.upload(self.storage.as_ref()).await;
        if let Some(url) = install_log {
            self.relay.send(ProgressEvent::InstallLog { msg: url });
        }

        let image = naming::app_image(&self.prefix);
        self.ledger.push(RollbackStep::RemoveImage(image.clone()));
        self.runtime.commit(&setup, &image).await?;

        self.runtime.remove_container(&setup).await?;
        self.ledger.forget(&RollbackStep::RemoveContainer(setup));

        Ok(image)
    }

    /// Stage 3: starts every service concurrently
    async fn start_services(
        self: &Arc<Self>,
        services: Vec<ServiceDescriptor>,
    ) -> Result<Vec<ServiceDescriptor>, PipelineError> {
        if services.is_empty() {
            return Ok(services);
        }
        self.log.log_info(format!("Starting {} service(s)", services.len()));

        let units = services
            .into_iter()
            .map(|service| {
                let run = Arc::clone(self);
                async move { run.start_service(service).await }
            })
            .collect::<Vec<_>>();

        try_join_all(units, &self.stragglers).await
    }

    async fn start_service(&self, mut service: ServiceDescriptor) -> Result<ServiceDescriptor, PipelineError> {
        let name = naming::service_container(&self.prefix, &service.id);
        let host_port = self.ports.next();

        let spec = ContainerSpec::new(&name, &service.image).publish(host_port, service.port);
        self.ledger.push(RollbackStep::RemoveContainer(name.clone()));
        self.runtime.start_container(&spec).await?;

        if let Some(done_text) = service.done_text.clone() {
            let label = format!("service {}", service.id);
            let logs = LogPair::new(&label, self.config.log_max_bytes);
            let follower = launcher::launch(Launch {
                label,
                command: self.runtime.logs_command(&name),
                signal: ReadySignal::Contains(done_text),
                timeout: self.config.timeouts.service_ready,
                logs: logs.clone(),
            })
            .await;

            match follower {
                Ok(follower) => {
                    follower.stop().await;
                    logs.discard().await;
                }
                Err(e) => return Err(self.attach_logs(e, &logs).await.into()),
            }
        }

        let ip = self.runtime.container_ip(&name).await?;
        service.internal_url = Some(service.render_url(&ip, service.port));
        service.external_url = Some(service.render_url(&self.config.host_ip, host_port));
        service.ip = Some(ip);

        self.log.log_info(format!(
            "Service {} started at {}",
            service.id,
            service.internal_url.as_deref().unwrap_or_default()
        ));
        Ok(service)
    }

    /// Stage 4: starts an idle container for every process instance
    async fn prepare_user_containers(
        self: &Arc<Self>,
        request: &SubmissionRequest,
        image: &str,
    ) -> Result<Vec<ProcessInstance>, PipelineError> {
        let mut instances = Vec::with_capacity(request.total_instances());
        for (process_name, spec) in &request.processes {
            let command = request.commands.get(process_name).ok_or_else(|| {
                OperationError::new(
                    format!("start {}", process_name),
                    format!("Command {} is missing in Procfile", process_name),
                )
            })?;

            for n in 0..spec.instances {
                instances.push(ProcessInstance {
                    process_name: process_name.clone(),
                    instance: n,
                    container_name: naming::app_container(&self.prefix, process_name, n),
                    command: command.clone(),
                    host_port: self.ports.next(),
                    ip: None,
                    env: BTreeMap::new(),
                });
            }
        }
        self.log
            .log_info(format!("Preparing {} user container(s)", instances.len()));

        let units = instances
            .into_iter()
            .map(|instance| {
                let run = Arc::clone(self);
                let image = image.to_string();
                async move { run.prepare_user_container(instance, &image).await }
            })
            .collect::<Vec<_>>();

        try_join_all(units, &self.stragglers).await
    }

    async fn prepare_user_container(
        &self,
        mut instance: ProcessInstance,
        image: &str,
    ) -> Result<ProcessInstance, PipelineError> {
        let is_web = instance.process_name == WEB_PROCESS;

        let mut spec = ContainerSpec::new(&instance.container_name, image)
            .limits(&self.config.limits.user)
            .idle();
        if is_web {
            spec = spec.publish(instance.host_port, self.config.app_http_port);
        }
        self.ledger
            .push(RollbackStep::RemoveContainer(instance.container_name.clone()));
        self.runtime.start_container(&spec).await?;

        instance.ip = Some(self.runtime.container_ip(&instance.container_name).await?);
        instance
            .env
            .insert("INSTANCE_NUMBER".to_string(), instance.instance.to_string());
        if is_web {
            instance
                .env
                .insert("PORT".to_string(), self.config.app_http_port.to_string());
        }

        Ok(instance)
    }

    /// Stage 5: blocks new outbound connections of every user container
    async fn disable_internet_connection(
        self: &Arc<Self>,
        instances: &[ProcessInstance],
    ) -> Result<(), PipelineError> {
        let units = instances
            .iter()
            .map(|instance| {
                let run = Arc::clone(self);
                let ip = instance.ip.clone();
                let label = instance.label();
                async move {
                    let ip = ip.ok_or_else(|| {
                        PipelineError::Internal(anyhow::anyhow!("{} has no IP address", label))
                    })?;
                    run.insert_rule(FirewallRule::isolate(ip)).await
                }
            })
            .collect::<Vec<_>>();

        try_join_all(units, &self.stragglers).await?;
        Ok(())
    }

    /// Stage 6: lets linked processes reach their services
    async fn link_containers(
        self: &Arc<Self>,
        services: &[ServiceDescriptor],
        instances: &mut [ProcessInstance],
    ) -> Result<(), PipelineError> {
        let mut rules = Vec::new();

        for service in services {
            let (Some(service_ip), Some(url)) = (&service.ip, &service.internal_url) else {
                continue;
            };

            for instance in instances
                .iter_mut()
                .filter(|i| service.is_linked_to(&i.process_name))
            {
                if let Some(ip) = &instance.ip {
                    rules.push(FirewallRule::link(ip.clone(), service_ip.clone()));
                }
                instance.env.insert(service.env_name.clone(), url.clone());
            }
        }

        if rules.is_empty() {
            return Ok(());
        }
        self.log.log_info(format!("Linking {} route(s)", rules.len()));

        let units = rules
            .into_iter()
            .map(|rule| {
                let run = Arc::clone(self);
                async move { run.insert_rule(rule).await }
            })
            .collect::<Vec<_>>();

        try_join_all(units, &self.stragglers).await?;
        Ok(())
    }

    async fn insert_rule(&self, rule: FirewallRule) -> Result<(), PipelineError> {
        self.runtime.insert_rule(&rule).await?;
        self.ledger.push(RollbackStep::RevokeFirewallRule(rule));
        Ok(())
    }

    /// Stage 7: starts every user process and waits for "READY"
    async fn start_containers(self: &Arc<Self>, instances: &[ProcessInstance]) -> Result<(), PipelineError> {
        self.relay.send(ProgressEvent::Ready);

        let units = instances
            .iter()
            .cloned()
            .map(|instance| {
                let run = Arc::clone(self);
                async move { run.start_process(instance).await }
            })
            .collect::<Vec<_>>();

        match try_join_all(units, &self.stragglers).await {
            Ok(_) => {
                self.relay.send(ProgressEvent::ReadyOk);
                Ok(())
            }
            Err(e) => {
                if e.is_readiness_timeout() {
                    self.relay.send(ProgressEvent::ReadyTimeout);
                }
                Err(e)
            }
        }
    }

    async fn start_process(&self, instance: ProcessInstance) -> Result<(), PipelineError> {
        let label = instance.label();
        let logs = LogPair::new(&label, self.config.log_max_bytes);
        let script = user_script(&self.config.app_dir, &instance);

        let launched = launcher::launch(Launch {
            label: label.clone(),
            command: self.runtime.exec_command(&instance.container_name, &script),
            signal: ReadySignal::ready_line(),
            timeout: self.config.timeouts.ready,
            logs: logs.clone(),
        })
        .await;

        match launched {
            Ok(process) => {
                self.log.log_info(format!("{} is ready", label));
                self.processes.lock().unwrap().push((process, logs));
                Ok(())
            }
            Err(e) => Err(self.attach_logs(e, &logs).await.into()),
        }
    }

    /// Stage 8: runs the test case
    async fn start_unit_tests(
        &self,
        test_case: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<UnitTestResult, PipelineError> {
        self.relay.send(ProgressEvent::BeforeStart);
        self.log.log_info(format!("Running test case {}", test_case));
        self.tests.run(test_case, env, &self.relay, &self.log).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(process_name: &str, n: u32, port: u16) -> ProcessInstance {
        ProcessInstance {
            process_name: process_name.to_string(),
            instance: n,
            container_name: format!("app-{}-{}", process_name, n),
            command: "npm start".to_string(),
            host_port: port,
            ip: Some(format!("10.0.0.{}", n + 2)),
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_install_table() {
        assert_eq!(install_command("nodejs"), Some("npm install"));
        assert_eq!(install_command("python"), Some("pip install -r requirements.txt"));
        assert_eq!(install_command("cobol"), None);
    }

    #[test]
    fn test_env_for_web_instances_and_services() {
        let service = ServiceDescriptor {
            id: "db".to_string(),
            image: "mongo".to_string(),
            port: 27017,
            url: "mongodb://{{ip}}:{{port}}/app".to_string(),
            env_name: "MONGODB_URL".to_string(),
            link: vec!["web".to_string()],
            done_text: None,
            ip: Some("10.0.0.9".to_string()),
            internal_url: Some("mongodb://10.0.0.9:27017/app".to_string()),
            external_url: Some("mongodb://1.2.3.4:40005/app".to_string()),
        };
        let instances = vec![
            instance("web", 0, 40_001),
            instance("web", 1, 40_002),
            instance("worker", 0, 40_003),
        ];

        let env = test_env("1.2.3.4", &[service], &instances);
        assert_eq!(env["API_URL"], "http://1.2.3.4:40001");
        assert_eq!(env["API_URL_0"], "http://1.2.3.4:40001");
        assert_eq!(env["API_URL_1"], "http://1.2.3.4:40002");
        assert_eq!(env["MONGODB_URL"], "mongodb://1.2.3.4:40005/app");
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn test_user_script_exports_env() {
        let mut web = instance("web", 0, 40_001);
        web.env.insert("PORT".to_string(), "8080".to_string());
        web.env.insert("GREETING".to_string(), "it's me".to_string());

        assert_eq!(
            user_script("/app", &web),
            "export GREETING='it'\\''s me'\nexport PORT='8080'\ncd '/app'\nnpm start"
        );
    }
}
