//! 求职调研流水线预设
//!
//! 10 个 Worker / Stage 按固定顺序执行：职位检索 → ATS 评估 → 公司动态 → 口碑 → 校友 → 导师
//! → 面试经验联系人 → 面试题库 → HR 联系人 → 汇总报告。
//! 前九个 Worker 具备 web_search 能力并可在成对的同伴之间委派；报告 Worker 只读取前序输出。

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::knowledge::KnowledgeSource;
use crate::llm::LlmClient;
use crate::pipeline::{Capability, InputContext, Pipeline, PipelineBuilder, PromptTemplate, Worker};

pub const PIPELINE_NAME: &str = "job-search";

pub const COMPANY_NAME: &str = "company_name";
pub const ROLE: &str = "role";
pub const EXPERIENCE: &str = "experience";
pub const UNIVERSITY_NAME: &str = "university_name";

/// 最终报告的小节，按顺序
pub const REPORT_SECTIONS: [&str; 10] = [
    "Company Overview",
    "Review Summary",
    "Job Opportunities",
    "Mentorship Connections",
    "Employees to Reach Out",
    "Alumni Networking",
    "ATS Resume Evaluation",
    "Interview Preparation",
    "HR Contacts",
    "Sources",
];

/// 阶段名，按执行顺序
pub const STAGE_ORDER: [&str; 10] = [
    "job_scout",
    "ats_evaluation",
    "company_insights",
    "review_radar",
    "alumni_connect",
    "mentor_finder",
    "interview_outreach",
    "interview_questions",
    "hr_contacts",
    "final_report",
];

/// 一次求职调研的用户输入
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSearchRequest {
    pub company_name: String,
    pub role: String,
    pub experience: String,
    pub university_name: String,
    /// 简历（PDF 或文本），作为知识附件
    pub resume: Option<PathBuf>,
}

impl JobSearchRequest {
    /// 空白字段不写入，交给运行前校验报告 MissingParameter
    pub fn to_inputs(&self) -> InputContext {
        [
            (COMPANY_NAME, &self.company_name),
            (ROLE, &self.role),
            (EXPERIENCE, &self.experience),
            (UNIVERSITY_NAME, &self.university_name),
        ]
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k, v.trim().to_string()))
        .collect()
    }

    pub fn knowledge_sources(&self) -> Vec<KnowledgeSource> {
        self.resume.iter().cloned().map(KnowledgeSource::new).collect()
    }
}

struct WorkerPreset {
    name: &'static str,
    role: &'static str,
    goal: &'static str,
    backstory: &'static str,
    search: bool,
    delegates: &'static [&'static str],
}

const WORKERS: [WorkerPreset; 10] = [
    WorkerPreset {
        name: "JobScout",
        role: "Job Opportunity Explorer",
        goal: "Find current openings at {company_name} that match a {role} candidate with {experience} experience. \
               If none are listed, point to the company's careers page.",
        backstory: "Tracks careers pages and job boards and reports titles, short descriptions and apply links without padding.",
        search: true,
        delegates: &["AtsEvaluator"],
    },
    WorkerPreset {
        name: "AtsEvaluator",
        role: "Resume Optimizer and ATS Evaluator",
        goal: "Score the candidate's resume against each opening found for {role} at {company_name} and explain how to improve it.",
        backstory: "Has parsed thousands of resumes and reads intent as well as keywords: collaboration counts as teamwork even when the word is missing.",
        search: true,
        delegates: &["JobScout"],
    },
    WorkerPreset {
        name: "CompanyInsider",
        role: "Corporate Intelligence Analyst",
        goal: "Summarise recent news, key developments and leadership at {company_name} so the candidate can talk about them naturally.",
        backstory: "Follows press releases, earnings calls and trade press and turns them into talking points.",
        search: true,
        delegates: &["ReviewRadar"],
    },
    WorkerPreset {
        name: "ReviewRadar",
        role: "Company Reputation Analyst",
        goal: "Distil employee reviews of {company_name} into clear themes and a justified hiring difficulty score.",
        backstory: "Reads Glassdoor, AmbitionBox and Reddit threads and separates recurring patterns from one-off complaints.",
        search: true,
        delegates: &["CompanyInsider"],
    },
    WorkerPreset {
        name: "AlumniConnector",
        role: "Networking Facilitator",
        goal: "Find {university_name} alumni working at {company_name} and draft warm outreach messages.",
        backstory: "Knows that a shared campus is the easiest opener and writes messages that sound like a person, not a template.",
        search: true,
        delegates: &["MentorFinder"],
    },
    WorkerPreset {
        name: "MentorFinder",
        role: "Mentorship Connector",
        goal: "Identify experienced people at {company_name} who could mentor a {role} candidate with {experience} experience.",
        backstory: "Matches seniority and domain so each suggested mentor can actually help with the target role.",
        search: true,
        delegates: &["AlumniConnector"],
    },
    WorkerPreset {
        name: "InterviewInsider",
        role: "Interview Experience Connector",
        goal: "Find people who recently interviewed for {role} at {company_name} and draft friendly questions about their experience.",
        backstory: "Asks about question types, interview structure and interviewer style in a way that invites a reply.",
        search: true,
        delegates: &["InterviewInsight"],
    },
    WorkerPreset {
        name: "InterviewInsight",
        role: "Interview Question Specialist",
        goal: "Build a categorised question bank for {role} at {company_name} at the {experience} level, including questions drawn from the resume.",
        backstory: "Mines Glassdoor, LeetCode, Reddit and LinkedIn posts and keeps track of where every question came from.",
        search: true,
        delegates: &["InterviewInsider"],
    },
    WorkerPreset {
        name: "HrHunter",
        role: "HR Contact Finder",
        goal: "Locate verifiable HR and recruiter contacts at {company_name}.",
        backstory: "Only reports contacts found on official pages or public profiles and never guesses email addresses.",
        search: true,
        delegates: &["CompanyInsider"],
    },
    WorkerPreset {
        name: "ReportMaster",
        role: "Final Report Compiler",
        goal: "Turn every finding about {role} at {company_name} into one clear, actionable report.",
        backstory: "Edits research into documents people actually read: consistent headings, no repetition, sources kept.",
        search: false,
        delegates: &["CompanyInsider", "JobScout"],
    },
];

struct StagePreset {
    name: &'static str,
    worker: &'static str,
    instruction: &'static str,
    expected_output: &'static str,
}

const STAGES: [StagePreset; 9] = [
    StagePreset {
        name: "job_scout",
        worker: "JobScout",
        instruction: "List the current openings at {company_name} for the {role} position that fit {experience} experience, with links.",
        expected_output: "A list of open roles, each with title, one-line description and apply link.",
    },
    StagePreset {
        name: "ats_evaluation",
        worker: "AtsEvaluator",
        instruction: "Evaluate the attached resume against these openings:\n{stage:job_scout}\n\n\
                      Weight the score as skills match 40%, experience relevance 30%, education alignment 20%, keyword presence 10%.",
        expected_output: "For each role: job_role, ats_score (0-100), feedback with concrete improvements, contextual_fit. \
                          End with the role the candidate should apply to first.",
    },
    StagePreset {
        name: "company_insights",
        worker: "CompanyInsider",
        instruction: "Research recent news and key facts about {company_name}, including who the CEO is.",
        expected_output: "A conversational summary the candidate could repeat in an interview, naming the CEO.",
    },
    StagePreset {
        name: "review_radar",
        worker: "ReviewRadar",
        instruction: "Summarise employee reviews of {company_name}: work-life balance, salary, growth and hiring difficulty.",
        expected_output: "Themes with positive and negative points, plus a Difficulty Score out of 10 with its justification.",
    },
    StagePreset {
        name: "alumni_connect",
        worker: "AlumniConnector",
        instruction: "Find {university_name} alumni currently working at {company_name}.",
        expected_output: "A list of alumni with LinkedIn profile and a personalised message mentioning {university_name}.",
    },
    StagePreset {
        name: "mentor_finder",
        worker: "MentorFinder",
        instruction: "Find employees at {company_name} who could mentor someone targeting {role} with {experience} experience.",
        expected_output: "A list of mentors with LinkedIn profile and a personalised outreach message.",
    },
    StagePreset {
        name: "interview_outreach",
        worker: "InterviewInsider",
        instruction: "Find people who recently interviewed at {company_name} for {role} and write messages asking about their interview.",
        expected_output: "A list of people with LinkedIn profile and a natural-sounding message about questions, structure and advice.",
    },
    StagePreset {
        name: "interview_questions",
        worker: "InterviewInsight",
        instruction: "Collect interview questions for {role} at {company_name} at the {experience} level. \
                      Add questions a reviewer would ask about the attached resume.",
        expected_output: "Four groups: Technical, HR/Behavioral, Coding Problems, Resume-Based. \
                          Each question with source URL and difficulty where known.",
    },
    StagePreset {
        name: "hr_contacts",
        worker: "HrHunter",
        instruction: "Find HR and recruiter contacts at {company_name} from official pages or public profiles.",
        expected_output: "A list of contacts with name, title and LinkedIn profile, email or careers page for {company_name}.",
    },
];

const REPORT_INTRO: &str = "Compile everything gathered for the {role} role at {company_name} into one report for a candidate \
                            with {experience} experience from {university_name}. Keep links and scores, drop repetition.";

/// 构建求职调研流水线；所有 Worker 共用同一后端
pub fn build_pipeline(backend: Arc<dyn LlmClient>) -> Result<Pipeline, PipelineError> {
    let mut builder = PipelineBuilder::new(PIPELINE_NAME);

    for preset in &WORKERS {
        let mut worker = Worker::new(
            preset.name,
            preset.role,
            PromptTemplate::parse(preset.goal)?,
            PromptTemplate::parse(preset.backstory)?,
            backend.clone(),
        )
        .with_delegates(preset.delegates.iter().copied());
        if preset.search {
            worker = worker.with_capability(Capability::WebSearch);
        }
        builder = builder.worker(worker);
    }

    for preset in &STAGES {
        builder = builder.stage(preset.name, preset.worker, preset.instruction, preset.expected_output);
    }

    builder
        .aggregate("final_report", "ReportMaster", REPORT_INTRO, &REPORT_SECTIONS)
        .build()
}
