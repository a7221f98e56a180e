//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl OracleConfig {
    /// Driver name or library path for the ODBC connection string.
    pub fn driver_path(&self) -> String {
        let driver = Path::new(&self.driver);
        match &self.client_lib_dir {
            Some(dir) if driver.extension().is_some() && driver.is_relative() => {
                PathBuf::from(dir).join(driver).display().to_string()
            }
            _ => self.driver.clone(),
        }
    }

    /// Build an ODBC connection string using an EZConnect `DBQ`.
    pub fn connection_string(&self) -> Result<String> {
        Ok(format!(
            "Driver={};DBQ={}:{}/{};UID={};PWD={};",
            odbc_braced(&self.driver_path()),
            self.host,
            self.port,
            self.service,
            odbc_braced(&self.user),
            odbc_braced(&self.password()?)
        ))
    }
}

/// Brace an ODBC attribute value so `;` and `=` are taken literally.
/// A closing brace inside the value is doubled.
fn odbc_braced(value: &str) -> String {
    format!("{{{}}}", value.replace('}', "}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORACLE_YAML: &str = r#"
source:
  type: oracle
  host: ora.example.org
  service: AT12PRD.WORLD
  user: reader
  password: secret
destination:
  host: localhost
  database: fusion
  user: etl
replication:
  tables: [COLLISIONS, CL_OBJECTS]
  sample_size: 100
  batch_size: 500
  dev_mode: true
  primary_key_strategy: constraints
  overrides:
    COLLISIONS:
      rename:
        FATAL_COMMENT: fatal_comments
      derive:
        - name: case_year
          kind: year
          from: [OCCURENCE_TIMESTAMP, REPORTED_TIMESTAMP]
        - name: occurence_timestring
          kind: date_string
          from: OCCURENCE_TIMESTAMP
        - name: source
          kind: constant
          value: eCollision Oracle
"#;

    #[test]
    fn test_parse_oracle_config() {
        let config = Config::from_yaml(ORACLE_YAML).unwrap();
        let SourceConfig::Oracle(oracle) = &config.source else {
            panic!("expected oracle source");
        };
        assert_eq!(oracle.port, 1521);
        assert_eq!(oracle.owner, "ECRDBA");
        assert_eq!(oracle.max_text_cell_bytes, 65536);
        assert_eq!(config.destination.port, 5432);
        assert_eq!(config.destination.schema, "public");
        assert_eq!(config.replication.batch_size, 500);
        assert_eq!(config.replication.sample_size, Some(100));
        assert_eq!(
            config.replication.primary_key_strategy,
            PrimaryKeyStrategy::Constraints
        );

        let overrides = &config.replication.overrides["COLLISIONS"];
        assert_eq!(overrides.rename["FATAL_COMMENT"], "fatal_comments");
        assert_eq!(overrides.derive.len(), 3);
        assert_eq!(
            overrides.derive[1].kind,
            DeriveKind::DateString {
                from: "OCCURENCE_TIMESTAMP".into(),
                format: "%Y-%m-%d".into()
            }
        );
    }

    #[test]
    fn test_naming_defaults_to_dialect_prefix() {
        let config = Config::from_yaml(ORACLE_YAML).unwrap();
        let naming = config.naming();
        assert_eq!(naming.destination_table("COLLISIONS"), "oracle_collisions_dev");
    }

    #[test]
    fn test_naming_convention() {
        let naming = NamingConvention::new("analytics", false);
        assert_eq!(naming.destination_table("CL_OBJECTS"), "analytics_cl_objects");
        let dev = NamingConvention::new("Fusion", true);
        assert_eq!(dev.destination_table("Collisions"), "fusion_collisions_dev");
        assert_eq!(
            dev.destination_table("Collisions"),
            dev.destination_table("Collisions")
        );
    }

    #[test]
    fn test_defaults_for_mssql() {
        let yaml = r#"
source:
  type: mssql
  host: sql.example.org
  database: eCollisionAnalytics
  user: reader
destination:
  host: localhost
  database: fusion
  user: etl
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let SourceConfig::Mssql(mssql) = &config.source else {
            panic!("expected mssql source");
        };
        assert_eq!(mssql.port, 1433);
        assert_eq!(mssql.auth, MssqlAuth::SqlServer);
        assert_eq!(mssql.schema, "dbo");
        assert!(mssql.encrypt);
        assert_eq!(config.replication.batch_size, 1);
        assert!(config.replication.tables.is_empty());
        assert_eq!(
            config.replication.primary_key_strategy,
            PrimaryKeyStrategy::ConstraintsThenIdColumn
        );
        assert_eq!(config.naming().destination_table("X"), "analytics_x");
    }

    #[test]
    fn test_parse_integrated_mssql_auth() {
        let yaml = r#"
source:
  type: mssql
  host: sql.example.org
  database: eCollisionAnalytics
  auth: integrated
destination:
  host: localhost
  database: fusion
  user: etl
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let SourceConfig::Mssql(mssql) = &config.source else {
            panic!("expected mssql source");
        };
        assert_eq!(mssql.auth, MssqlAuth::Integrated);
        assert!(mssql.user.is_empty());

        let without_user = yaml.replace("  auth: integrated\n", "");
        assert!(Config::from_yaml(&without_user).is_err());

        let explicit = yaml.replace("auth: integrated", "auth: sql_server");
        assert!(Config::from_yaml(&explicit).is_err());

        let unknown = yaml.replace("auth: integrated", "auth: kerberos");
        assert!(Config::from_yaml(&unknown).is_err());
    }

    #[test]
    fn test_unknown_source_type_rejected() {
        let yaml = r#"
source:
  type: mysql
  host: h
destination:
  host: localhost
  database: fusion
  user: etl
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_password_from_environment() {
        let mut config = Config::from_yaml(ORACLE_YAML).unwrap();
        config.destination.password_env = Some("FUSION_REPLICATE_TEST_PG_PASSWORD".into());
        std::env::set_var("FUSION_REPLICATE_TEST_PG_PASSWORD", "from-env");
        assert_eq!(config.destination.password().unwrap(), "from-env");

        config.destination.password_env = Some("FUSION_REPLICATE_TEST_UNSET_VAR".into());
        assert!(config.destination.password().is_err());
    }

    #[test]
    fn test_oracle_connection_string() {
        let config = Config::from_yaml(ORACLE_YAML).unwrap();
        let SourceConfig::Oracle(mut oracle) = config.source else {
            panic!("expected oracle source");
        };
        assert_eq!(
            oracle.connection_string().unwrap(),
            "Driver={Oracle in instantclient};DBQ=ora.example.org:1521/AT12PRD.WORLD;UID={reader};PWD={secret};"
        );

        oracle.password = "se;c}ret=".into();
        assert!(oracle
            .connection_string()
            .unwrap()
            .ends_with(";PWD={se;c}}ret=};"));

        oracle.driver = "libsqora.so.19.1".into();
        oracle.client_lib_dir = Some("/opt/oracle/instantclient_19_20".into());
        assert_eq!(
            oracle.driver_path(),
            "/opt/oracle/instantclient_19_20/libsqora.so.19.1"
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, ORACLE_YAML).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.source.dialect(), crate::source::Dialect::Oracle);

        assert!(matches!(
            Config::load(dir.path().join("missing.yaml")),
            Err(crate::error::ReplicateError::Io(_))
        ));
    }
}
