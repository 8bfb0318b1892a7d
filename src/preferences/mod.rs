//! 求职偏好表单
//!
//! 与流水线无关的独立入口：把表单提交解析、校验为 JOB_PREFERENCES 表的一行。
//! 关键词按逗号拆分（去空白、丢弃空项），关键词与通知邮箱必填；未上传简历只是警告。
//! 本模块不负责持久化。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("please enter at least one keyword")]
    MissingKeywords,

    #[error("please enter an email to notify")]
    MissingEmail,

    #[error("'{0}' does not look like an email address")]
    InvalidEmail(String),

    #[error("unknown job type '{0}' (expected Full-time, Part-time, Contract or Internship)")]
    UnknownJobType(String),

    #[error("unknown experience level '{0}' (expected Entry, Mid-Senior, Director or Executive)")]
    UnknownExperienceLevel(String),

    #[error("cannot encode keywords: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[default]
    #[serde(rename = "Full-time")]
    FullTime,
    #[serde(rename = "Part-time")]
    PartTime,
    Contract,
    Internship,
}

impl JobType {
    pub const ALL: [JobType; 4] = [Self::FullTime, Self::PartTime, Self::Contract, Self::Internship];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullTime => "Full-time",
            Self::PartTime => "Part-time",
            Self::Contract => "Contract",
            Self::Internship => "Internship",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = PreferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PreferenceError::UnknownJobType(wanted.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperienceLevel {
    #[default]
    Entry,
    #[serde(rename = "Mid-Senior")]
    MidSenior,
    Director,
    Executive,
}

impl ExperienceLevel {
    pub const ALL: [ExperienceLevel; 4] = [Self::Entry, Self::MidSenior, Self::Director, Self::Executive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "Entry",
            Self::MidSenior => "Mid-Senior",
            Self::Director => "Director",
            Self::Executive => "Executive",
        }
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperienceLevel {
    type Err = PreferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PreferenceError::UnknownExperienceLevel(wanted.to_string()))
    }
}

/// 原始表单提交
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceSubmission {
    /// 逗号分隔
    pub keywords: String,
    pub location: String,
    pub job_type: String,
    pub experience_level: String,
    /// 自由文本，如 90000-120000
    pub salary_range: String,
    pub notify_email: String,
    pub resume: Option<Vec<u8>>,
}

/// 校验后的记录，对应 JOB_PREFERENCES 的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPreferenceRecord {
    pub keywords: Vec<String>,
    pub location: String,
    pub job_type: JobType,
    pub experience_level: ExperienceLevel,
    pub salary_range: String,
    pub notify_email: String,
    #[serde(skip)]
    pub resume: Option<Vec<u8>>,
}

impl JobPreferenceRecord {
    /// keywords 列存储的 JSON 数组
    pub fn keywords_json(&self) -> Result<String, PreferenceError> {
        serde_json::to_string(&self.keywords).map_err(|e| PreferenceError::Encoding(e.to_string()))
    }

    /// 写入表时的列值（简历只给出字节数）
    pub fn row(&self) -> Result<serde_json::Value, PreferenceError> {
        Ok(serde_json::json!({
            "keywords": self.keywords_json()?,
            "location": self.location,
            "job_type": self.job_type.as_str(),
            "experience_level": self.experience_level.as_str(),
            "salary_range": self.salary_range,
            "notify_email": self.notify_email,
            "resume_bytes": self.resume.as_ref().map(|r| r.len()),
        }))
    }
}

/// 校验结果：记录与非致命警告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPreferences {
    pub record: JobPreferenceRecord,
    pub warnings: Vec<String>,
}

/// 逗号分隔的关键词：去空白、丢弃空项
pub fn parse_keywords(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

impl PreferenceSubmission {
    pub fn validate(self) -> Result<ValidatedPreferences, PreferenceError> {
        let keywords = parse_keywords(&self.keywords);
        if keywords.is_empty() {
            return Err(PreferenceError::MissingKeywords);
        }

        let email = self.notify_email.trim();
        if email.is_empty() {
            return Err(PreferenceError::MissingEmail);
        }
        if !looks_like_email(email) {
            return Err(PreferenceError::InvalidEmail(email.to_string()));
        }

        let job_type: JobType = self.job_type.parse()?;
        let experience_level: ExperienceLevel = self.experience_level.parse()?;

        let mut warnings = Vec::new();
        let resume = self.resume.filter(|r| !r.is_empty());
        if resume.is_none() {
            warnings.push("No resume uploaded; the resume field will be empty.".to_string());
        }

        Ok(ValidatedPreferences {
            record: JobPreferenceRecord {
                keywords,
                location: self.location.trim().to_string(),
                job_type,
                experience_level,
                salary_range: self.salary_range.trim().to_string(),
                notify_email: email.to_string(),
                resume,
            },
            warnings,
        })
    }
}

fn looks_like_email(s: &str) -> bool {
    if s.contains(char::is_whitespace) {
        return false;
    }
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
