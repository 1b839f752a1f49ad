use docker_compose_types::{
    Compose, ComposeNetworks, DependsCondition, DependsOnOptions, Environment, Healthcheck,
    HealthcheckTest, MapOrEmpty, NetworkSettings, Networks, Ports, Service, Services, Volumes,
};
use indexmap::IndexMap;

use crate::config::StackConfig;
use crate::error::ProvisionResult;

/// Service names. Site routes and `docker compose exec` rely on these.
pub const PROXY_SERVICE: &str = "nginx";
pub const RUNTIME_SERVICE: &str = "php";
pub const DATABASE_SERVICE: &str = "db";
pub const ADMIN_SERVICE: &str = "phpmyadmin";

/// Render the `docker-compose.yml` for the stack.
///
/// Credentials are referenced as `${VAR}` and resolved by compose
/// from the `.env` file next to it, so this file holds no secrets.
/// The runtime only sees the application's own database credentials.
pub fn render(stack: &StackConfig) -> ProvisionResult<String> {
    let mut services = IndexMap::new();

    services.insert(DATABASE_SERVICE.to_string(), Some(database_service(stack)));
    services.insert(RUNTIME_SERVICE.to_string(), Some(runtime_service(stack)));
    services.insert(ADMIN_SERVICE.to_string(), Some(admin_service(stack)));
    services.insert(PROXY_SERVICE.to_string(), Some(proxy_service(stack)));

    let compose = Compose {
        services: Services(services),
        networks: network(stack),
        ..Default::default()
    };

    Ok(serde_yaml::to_string(&compose)?)
}

/// Container name for `service` within the project.
#[must_use]
pub fn container_name(stack: &StackConfig, service: &str) -> String {
    format!("{}-{service}", stack.project)
}

fn network_name(stack: &StackConfig) -> String {
    format!("{}-network", stack.project)
}

fn base_service(stack: &StackConfig, name: &str, image: &str) -> Service {
    Service {
        image: Some(image.to_string()),
        container_name: Some(container_name(stack, name)),
        restart: Some("unless-stopped".to_string()),
        networks: Networks::Simple(vec![network_name(stack)]),
        ..Default::default()
    }
}

fn environment(vars: &[(&str, &str)]) -> Environment {
    Environment::List(vars.iter().map(|(k, v)| format!("{k}={v}")).collect())
}

fn binds(mounts: &[&str]) -> Vec<Volumes> {
    mounts.iter().map(|m| Volumes::Simple((*m).to_string())).collect()
}

fn database_service(stack: &StackConfig) -> Service {
    let healthcheck = Healthcheck {
        test: Some(HealthcheckTest::Multiple(vec![
            "CMD".to_string(),
            "sh".to_string(),
            "-c".to_string(),
            "mysqladmin ping -h localhost --silent".to_string(),
        ])),
        interval: Some("10s".to_string()),
        timeout: Some("5s".to_string()),
        retries: 10,
        start_period: Some("30s".to_string()),
        ..Default::default()
    };

    Service {
        environment: environment(&[
            ("MYSQL_ROOT_PASSWORD", "${DB_ROOT_PASSWORD}"),
            ("MYSQL_DATABASE", "${DB_NAME}"),
            ("MYSQL_USER", "${DB_USER}"),
            ("MYSQL_PASSWORD", "${DB_PASSWORD}"),
        ]),
        volumes: binds(&[
            "./mysql/data:/var/lib/mysql",
            "./mysql/conf.d:/etc/mysql/conf.d:ro",
        ]),
        expose: vec!["3306".to_string()],
        healthcheck: Some(healthcheck),
        ..base_service(stack, DATABASE_SERVICE, &stack.mysql_image)
    }
}

fn depends_on_healthy_db() -> DependsOnOptions {
    let mut depends = IndexMap::new();
    depends.insert(
        DATABASE_SERVICE.to_string(),
        DependsCondition::service_healthy(),
    );
    DependsOnOptions::Conditional(depends)
}

fn runtime_service(stack: &StackConfig) -> Service {
    Service {
        environment: environment(&[
            ("DB_HOST", DATABASE_SERVICE),
            ("DB_NAME", "${DB_NAME}"),
            ("DB_USER", "${DB_USER}"),
            ("DB_PASSWORD", "${DB_PASSWORD}"),
        ]),
        volumes: binds(&[
            "./www:/var/www/html",
            "./php/www.conf:/usr/local/etc/php-fpm.d/www.conf:ro",
            "./php/php.ini:/usr/local/etc/php/conf.d/zz-stackwright.ini:ro",
        ]),
        expose: vec!["9000".to_string()],
        depends_on: depends_on_healthy_db(),
        ..base_service(stack, RUNTIME_SERVICE, &stack.php_image)
    }
}

fn admin_service(stack: &StackConfig) -> Service {
    Service {
        environment: environment(&[
            ("PMA_HOST", DATABASE_SERVICE),
            ("PMA_PORT", "3306"),
            ("PMA_ABSOLUTE_URI", "${SITE_URL}/phpmyadmin/"),
            ("UPLOAD_LIMIT", "${UPLOAD_MAX_BYTES}"),
        ]),
        expose: vec!["80".to_string()],
        depends_on: depends_on_healthy_db(),
        ..base_service(stack, ADMIN_SERVICE, &stack.phpmyadmin_image)
    }
}

fn proxy_service(stack: &StackConfig) -> Service {
    Service {
        ports: Ports::Short(vec!["80:80".to_string(), "443:443".to_string()]),
        volumes: binds(&[
            "./nginx/nginx.conf:/etc/nginx/nginx.conf:ro",
            "./nginx/conf.d:/etc/nginx/conf.d:ro",
            "./www:/var/www/html:ro",
            "./certbot/www:/var/www/certbot:ro",
            "./certbot/conf:/etc/letsencrypt:ro",
            "./logs/nginx:/var/log/nginx",
        ]),
        depends_on: DependsOnOptions::Simple(vec![
            RUNTIME_SERVICE.to_string(),
            ADMIN_SERVICE.to_string(),
        ]),
        ..base_service(stack, PROXY_SERVICE, &stack.nginx_image)
    }
}

fn network(stack: &StackConfig) -> ComposeNetworks {
    let mut nets = IndexMap::new();
    nets.insert(
        network_name(stack),
        MapOrEmpty::Map(NetworkSettings {
            driver: Some("bridge".to_string()),
            ..Default::default()
        }),
    );
    ComposeNetworks(nets)
}
